use anyhow::Context;
use classbook_api::{app, AppState};
use classbook_booking::{BookingContext, BookingEngine};
use classbook_core::OsTokenGenerator;
use classbook_store::app_config::Config;
use classbook_store::{build_notifier, DbClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "classbook_api=debug,classbook_booking=debug,classbook_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Classbook API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = db
        .fetch_booking_rules(config.booking_rules.clone())
        .await
        .context("Failed to load booking rules")?;
    tracing::info!(?rules, "Booking rules loaded");

    let notifier = build_notifier(&config.email).context("Failed to set up email delivery")?;

    let ctx = BookingContext::new(
        Arc::new(db.store()),
        notifier,
        Arc::new(OsTokenGenerator),
        config.links.clone(),
        rules,
    )
    .with_owner_email(config.studio.owner_email.clone());

    let app = app(AppState::new(BookingEngine::new(ctx)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

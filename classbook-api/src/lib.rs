use axum::{http::Method, Json, Router};
use classbook_booking::Committed;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod bookings;
pub mod error;
pub mod state;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .merge(bookings::routes())
        .merge(admin::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body for committed changes: the payload plus whether its email went out.
#[derive(Debug, Serialize)]
pub struct CommittedBody<T> {
    #[serde(flatten)]
    pub data: T,
    pub notification_sent: bool,
}

pub(crate) fn committed<T: Serialize>(committed: Committed<T>) -> Json<CommittedBody<T>> {
    let notification_sent = committed.notified();
    Json(CommittedBody {
        data: committed.into_value(),
        notification_sent,
    })
}

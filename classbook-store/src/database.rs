use classbook_core::StoreError;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::{BookingRules, DatabaseConfig};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlays rows of the `booking_rules` table on top of the file config.
    pub async fn fetch_booking_rules(&self, defaults: BookingRules) -> Result<BookingRules, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct RuleRow {
            rule_key: String,
            rule_value: Value,
        }

        let rows: Vec<RuleRow> = sqlx::query_as("SELECT rule_key, rule_value FROM booking_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for row in rows {
            // Expected format: {"value": <number or null>}
            let Some(v) = row.rule_value.get("value") else {
                warn!("Ignoring booking rule {} without a value", row.rule_key);
                continue;
            };
            apply_rule(&mut rules, &row.rule_key, v);
        }

        Ok(rules.clamped())
    }

    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }
}

fn apply_rule(rules: &mut BookingRules, key: &str, v: &Value) {
    match key {
        "max_pending_operations" => {
            if let Some(n) = v.as_i64() {
                rules.max_pending_operations = n;
            }
        }
        "token_bytes" => {
            if let Some(n) = v.as_u64() {
                rules.token_bytes = n as usize;
            }
        }
        "pending_ttl_seconds" => {
            // null switches expiry off
            if v.is_null() {
                rules.pending_ttl_seconds = None;
            } else if let Some(n) = v.as_u64() {
                rules.pending_ttl_seconds = Some(n);
            }
        }
        "notification_timeout_ms" => {
            if let Some(n) = v.as_u64() {
                rules.notification_timeout_ms = n;
            }
        }
        other => warn!("Unknown booking rule {}", other),
    }
}

/// Postgres implementation of every repository contract.
#[derive(Clone)]
pub struct PgStore {
    pub(crate) pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Maps driver errors onto the store contract, keeping constraint names.
pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::UniqueViolation(db.constraint().unwrap_or("unknown").to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::ForeignKeyViolation(db.constraint().unwrap_or("unknown").to_string())
        }
        other => StoreError::Backend(Box::new(other)),
    }
}

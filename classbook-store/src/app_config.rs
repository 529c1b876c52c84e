use classbook_core::token::{DEFAULT_TOKEN_BYTES, MIN_TOKEN_BYTES};
use classbook_shared::LinkBuilder;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub links: LinkBuilder,
    pub email: EmailConfig,
    pub studio: StudioConfig,
    #[serde(default)]
    pub booking_rules: BookingRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmailMode {
    /// Log messages instead of sending them.
    #[default]
    Console,
    Smtp,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default)]
    pub mode: EmailMode,
    pub smtp_server: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Deserialize, Clone)]
pub struct StudioConfig {
    pub owner_email: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BookingRules {
    /// Outstanding links allowed per (email, class).
    #[serde(default = "default_max_pending")]
    pub max_pending_operations: i64,
    #[serde(default = "default_token_bytes")]
    pub token_bytes: usize,
    /// Unset means links stay valid until used.
    #[serde(default)]
    pub pending_ttl_seconds: Option<u64>,
    #[serde(default = "default_notification_timeout_ms")]
    pub notification_timeout_ms: u64,
}

fn default_max_pending() -> i64 {
    2
}

fn default_token_bytes() -> usize {
    DEFAULT_TOKEN_BYTES
}

fn default_notification_timeout_ms() -> u64 {
    10_000
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            max_pending_operations: default_max_pending(),
            token_bytes: default_token_bytes(),
            pending_ttl_seconds: None,
            notification_timeout_ms: default_notification_timeout_ms(),
        }
    }
}

impl BookingRules {
    pub fn pending_ttl(&self) -> Option<chrono::Duration> {
        self.pending_ttl_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    /// Replaces values that would make every request fail.
    pub fn clamped(mut self) -> Self {
        if self.max_pending_operations < 1 {
            warn!(
                "max_pending_operations = {} would refuse every request, using 1",
                self.max_pending_operations
            );
            self.max_pending_operations = 1;
        }
        if self.token_bytes < MIN_TOKEN_BYTES {
            warn!(
                "token_bytes = {} is below the minimum, using {}",
                self.token_bytes, MIN_TOKEN_BYTES
            );
            self.token_bytes = MIN_TOKEN_BYTES;
        }
        if self.notification_timeout_ms == 0 {
            warn!(
                "notification_timeout_ms = 0 would time out every notice, using {}",
                default_notification_timeout_ms()
            );
            self.notification_timeout_ms = default_notification_timeout_ms();
        }
        self
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local file, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `CLASSBOOK__DATABASE__URL=...` sets `database.url`
            .add_source(config::Environment::with_prefix("CLASSBOOK").separator("__"));

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.booking_rules = config.booking_rules.clamped();
        Ok(config)
    }
}

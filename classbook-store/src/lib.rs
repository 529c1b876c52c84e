pub mod app_config;
pub mod booking_repo;
pub mod class_repo;
pub mod database;
pub mod memory;
pub mod notifier;
pub mod pass_repo;
pub mod pending_repo;

pub use database::{DbClient, PgStore};
pub use memory::{MemoryStore, RecordingNotifier, SentNotification};
pub use notifier::{build_notifier, ConsoleNotifier, EmailNotifier, SmtpNotifier};

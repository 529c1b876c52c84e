use classbook_core::{NotificationError, NotificationPort, Store, TokenGenerator};
use classbook_shared::LinkBuilder;
use classbook_store::app_config::BookingRules;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

/// Collaborators and settings shared by the booking services.
///
/// Holds no mutable state of its own; all state lives in the store.
#[derive(Clone)]
pub struct BookingContext {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn NotificationPort>,
    pub tokens: Arc<dyn TokenGenerator>,
    pub links: LinkBuilder,
    pub rules: BookingRules,
    /// Receives a notice for every attendee cancellation when set.
    pub owner_email: Option<String>,
}

impl BookingContext {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationPort>,
        tokens: Arc<dyn TokenGenerator>,
        links: LinkBuilder,
        rules: BookingRules,
    ) -> Self {
        Self {
            store,
            notifier,
            tokens,
            links,
            rules,
            owner_email: None,
        }
    }

    pub fn with_owner_email(mut self, owner_email: impl Into<String>) -> Self {
        let owner_email = owner_email.into();
        self.owner_email = (!owner_email.trim().is_empty()).then_some(owner_email);
        self
    }

    /// Runs a notification call under the configured deadline. Failures are
    /// logged and returned, never retried.
    pub(crate) async fn notify<F>(&self, what: &str, send: F) -> Result<(), NotificationError>
    where
        F: Future<Output = Result<(), NotificationError>>,
    {
        let deadline = self.rules.notification_timeout();
        let result = match tokio::time::timeout(deadline, send).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(deadline)),
        };

        if let Err(e) = &result {
            error!("Failed to send {}: {}", what, e);
        }
        result
    }
}

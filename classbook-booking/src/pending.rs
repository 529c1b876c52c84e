use chrono::{DateTime, Utc};
use classbook_core::repository::{BookingRepository, ClassRepository, PendingOperationRepository};
use classbook_core::{BookingDetails, BookingError, CoreResult, OperationKind, PendingOperation};
use classbook_shared::{normalize_email, Masked};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::BookingContext;
use crate::lifecycle::BookingLifecycle;
use crate::Committed;

/// Issues and resolves double-opt-in links.
///
/// A pending row is only consumed inside the lifecycle transaction that
/// applies it, so any rejected confirmation leaves the link usable.
#[derive(Clone)]
pub struct PendingOperationService {
    ctx: BookingContext,
    lifecycle: BookingLifecycle,
}

impl PendingOperationService {
    pub fn new(ctx: BookingContext, lifecycle: BookingLifecycle) -> Self {
        Self { ctx, lifecycle }
    }

    /// Files a booking request and mails its confirmation link.
    /// Returns the class id.
    pub async fn create_pending_booking(
        &self,
        class_id: Uuid,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> CoreResult<Committed<Uuid>> {
        let email = checked_email(email)?;
        let store = &self.ctx.store;

        let existing = store
            .get_by_email_and_class(class_id, &email)
            .await
            .map_err(BookingError::store("looking up existing booking"))?;
        if existing.is_some() {
            return Err(BookingError::BookingAlreadyExists);
        }

        self.check_throttle(&email, class_id).await?;

        let class = store
            .get_class(class_id)
            .await
            .map_err(BookingError::store("loading class"))?
            .ok_or(BookingError::ClassNotFound(class_id))?;
        if class.is_fully_booked() {
            return Err(BookingError::ClassFullyBooked);
        }
        if class.has_started(Utc::now()) {
            return Err(BookingError::ClassExpired);
        }

        let op = self
            .issue(class_id, OperationKind::CreateBooking, &email, first_name, last_name)
            .await?;
        let link = self.ctx.links.confirm_booking(&op.token);

        let notification = self
            .ctx
            .notify(
                "booking confirmation link",
                self.ctx
                    .notifier
                    .send_confirmation_link(&op.email, &op.first_name, op.kind, &link),
            )
            .await;

        Ok(Committed::new(class_id, notification))
    }

    /// Files a cancellation request for an existing or expected booking.
    /// Only the throttle and the class are checked here; the booking itself
    /// is matched when the link is confirmed.
    pub async fn cancel_pending_booking(
        &self,
        class_id: Uuid,
        email: &str,
    ) -> CoreResult<Committed<Uuid>> {
        let email = checked_email(email)?;
        let store = &self.ctx.store;

        self.check_throttle(&email, class_id).await?;

        store
            .get_class(class_id)
            .await
            .map_err(BookingError::store("loading class"))?
            .ok_or(BookingError::ClassNotFound(class_id))?;

        let (first_name, last_name) = store
            .get_by_email_and_class(class_id, &email)
            .await
            .map_err(BookingError::store("looking up booking to cancel"))?
            .map(|b| (b.first_name, b.last_name))
            .unwrap_or_default();

        let op = self
            .issue(class_id, OperationKind::CancelBooking, &email, &first_name, &last_name)
            .await?;
        let link = self.ctx.links.confirm_cancellation(&op.token);

        let notification = self
            .ctx
            .notify(
                "cancellation confirmation link",
                self.ctx
                    .notifier
                    .send_confirmation_link(&op.email, &op.first_name, op.kind, &link),
            )
            .await;

        Ok(Committed::new(class_id, notification))
    }

    /// Looks up a link's operation without consuming it.
    pub async fn resolve(&self, token: &str, expected: OperationKind) -> CoreResult<PendingOperation> {
        let op = self
            .ctx
            .store
            .get_by_token(token)
            .await
            .map_err(BookingError::store("resolving token"))?
            .ok_or(BookingError::InvalidOrExpiredLink)?;

        if op.kind != expected {
            warn!("Link for {} used where {} was expected", op.kind, expected);
            return Err(BookingError::InvalidOperationType {
                expected,
                found: op.kind,
            });
        }

        if op.is_expired(Utc::now()) {
            // Left in place for purge_expired.
            warn!(pending_id = %op.id, "Expired link used");
            return Err(BookingError::InvalidOrExpiredLink);
        }

        Ok(op)
    }

    pub async fn confirm_booking(&self, token: &str) -> CoreResult<Committed<BookingDetails>> {
        let op = self.resolve(token, OperationKind::CreateBooking).await?;
        self.lifecycle.confirm_booking(&op).await
    }

    pub async fn confirm_cancellation(&self, token: &str) -> CoreResult<Committed<BookingDetails>> {
        let op = self.resolve(token, OperationKind::CancelBooking).await?;
        self.lifecycle.cancel_booking(&op).await
    }

    /// Deletes links whose expiry lies before `now`. Returns how many.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let purged = self
            .ctx
            .store
            .delete_expired(now)
            .await
            .map_err(BookingError::store("purging expired pending operations"))?;

        info!(purged, "Purged expired pending operations");
        Ok(purged)
    }

    // Count-then-insert: two simultaneous requests can both pass the check.
    // The limit is a courtesy throttle, not an invariant.
    async fn check_throttle(&self, email: &str, class_id: Uuid) -> CoreResult<()> {
        let outstanding = self
            .ctx
            .store
            .count_for_user_and_class(email, class_id)
            .await
            .map_err(BookingError::store("counting pending operations"))?;

        if outstanding >= self.ctx.rules.max_pending_operations {
            warn!(
                email = %Masked(email),
                %class_id,
                outstanding,
                "Pending operation limit reached"
            );
            return Err(BookingError::TooManyPendingOperations);
        }
        Ok(())
    }

    async fn issue(
        &self,
        class_id: Uuid,
        kind: OperationKind,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> CoreResult<PendingOperation> {
        let token = self.ctx.tokens.generate(self.ctx.rules.token_bytes)?;
        let op = PendingOperation::new(
            class_id,
            kind,
            email,
            first_name,
            last_name,
            token,
            Utc::now(),
            self.ctx.rules.pending_ttl(),
        );

        self.ctx
            .store
            .insert_pending(&op)
            .await
            .map_err(BookingError::store("storing pending operation"))?;

        info!(
            pending_id = %op.id,
            %class_id,
            %kind,
            email = %Masked(email),
            "Pending operation created"
        );
        Ok(op)
    }
}

fn checked_email(email: &str) -> CoreResult<String> {
    let email = normalize_email(email);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(BookingError::Validation("a valid email address is required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{class_in, harness, harness_with, token_of};
    use chrono::Duration;
    use classbook_core::{TokenError, TokenGenerator};
    use classbook_store::app_config::BookingRules;
    use classbook_store::SentNotification;

    #[tokio::test]
    async fn test_create_pending_booking_sends_link() {
        let h = harness();
        let class = h.seed(class_in(24, 10)).await;

        let committed = h
            .engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "  Jane@Example.com ")
            .await
            .unwrap();

        assert_eq!(committed.value, class.id);
        assert!(committed.notified());
        assert_eq!(h.store.pending_count().await, 1);

        let sent = h.notifier.sent();
        match &sent[0] {
            SentNotification::ConfirmationLink { email, kind, link } => {
                assert_eq!(email, "jane@example.com");
                assert_eq!(*kind, OperationKind::CreateBooking);
                assert!(link.starts_with("https://studio.test/bookings/confirm?token="));
                assert_eq!(token_of(link).len(), 43);
            }
            other => panic!("unexpected notification {:?}", other),
        }
        // Nothing is reserved before confirmation.
        assert_eq!(h.capacity(class.id).await, 10);
    }

    #[tokio::test]
    async fn test_throttle_boundary() {
        let h = harness();
        let class = h.seed(class_in(24, 10)).await;
        let pending = &h.engine.pending;

        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        let third = pending
            .create_pending_booking(class.id, "Jane", "Doe", "JANE@example.com")
            .await;

        assert!(matches!(third, Err(BookingError::TooManyPendingOperations)));
        assert_eq!(h.store.pending_count().await, 2);

        // Other attendees are unaffected.
        pending.create_pending_booking(class.id, "John", "Roe", "john@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_throttle_counts_cancellation_requests() {
        let h = harness();
        let class = h.seed(class_in(24, 10)).await;
        let pending = &h.engine.pending;

        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        pending.cancel_pending_booking(class.id, "jane@example.com").await.unwrap();
        assert!(matches!(
            pending.cancel_pending_booking(class.id, "jane@example.com").await,
            Err(BookingError::TooManyPendingOperations)
        ));
    }

    #[tokio::test]
    async fn test_full_class_writes_nothing() {
        let h = harness();
        let mut class = class_in(24, 3);
        class.current_capacity = 0;
        let class = h.seed(class).await;

        let result = h
            .engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await;

        assert!(matches!(result, Err(BookingError::ClassFullyBooked)));
        assert_eq!(h.store.pending_count().await, 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_started_class_is_rejected() {
        let h = harness();
        let class = h.seed(class_in(-1, 5)).await;

        let result = h
            .engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await;
        assert!(matches!(result, Err(BookingError::ClassExpired)));
    }

    #[tokio::test]
    async fn test_unknown_class_and_bad_email() {
        let h = harness();
        let missing = Uuid::new_v4();

        assert!(matches!(
            h.engine.pending.create_pending_booking(missing, "Jane", "Doe", "jane@example.com").await,
            Err(BookingError::ClassNotFound(id)) if id == missing
        ));
        assert!(matches!(
            h.engine.pending.create_pending_booking(missing, "Jane", "Doe", "not-an-email").await,
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_existing_booking_blocks_new_request() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        let pending = &h.engine.pending;

        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        pending
            .confirm_booking(&h.last_token(OperationKind::CreateBooking))
            .await
            .unwrap();

        assert!(matches!(
            pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await,
            Err(BookingError::BookingAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_resolve_checks_kind() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        let pending = &h.engine.pending;

        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        let token = h.last_token(OperationKind::CreateBooking);

        let err = pending.confirm_cancellation(&token).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidOperationType {
                expected: OperationKind::CancelBooking,
                found: OperationKind::CreateBooking
            }
        ));
        // The wrong endpoint did not spend the link.
        assert!(pending.resolve(&token, OperationKind::CreateBooking).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let h = harness();
        assert!(matches!(
            h.engine.pending.confirm_booking("no-such-token").await,
            Err(BookingError::InvalidOrExpiredLink)
        ));
    }

    #[tokio::test]
    async fn test_expiry_policy_and_purge() {
        let h = harness_with(BookingRules {
            pending_ttl_seconds: Some(60),
            ..BookingRules::default()
        });
        let class = h.seed(class_in(24, 5)).await;
        let pending = &h.engine.pending;

        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        let token = h.last_token(OperationKind::CreateBooking);
        let op = pending.resolve(&token, OperationKind::CreateBooking).await.unwrap();
        let expires_at = op.expires_at.unwrap();
        assert_eq!(expires_at - op.created_at, Duration::seconds(60));

        // Nothing has expired yet.
        assert_eq!(pending.purge_expired(Utc::now()).await.unwrap(), 0);
        assert_eq!(pending.purge_expired(expires_at + Duration::seconds(1)).await.unwrap(), 1);
        assert!(matches!(
            pending.confirm_booking(&token).await,
            Err(BookingError::InvalidOrExpiredLink)
        ));
    }

    #[tokio::test]
    async fn test_permanent_links_are_never_purged() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;

        h.engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await
            .unwrap();
        let far_future = Utc::now() + Duration::days(3650);
        assert_eq!(h.engine.pending.purge_expired(far_future).await.unwrap(), 0);
        assert_eq!(h.store.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_pending_row() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        h.notifier.set_failing(true);

        let committed = h
            .engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await
            .unwrap();

        assert!(!committed.notified());
        assert_eq!(h.store.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_slow_notifier_times_out_after_commit() {
        let h = harness_with(BookingRules {
            notification_timeout_ms: 20,
            ..BookingRules::default()
        });
        let class = h.seed(class_in(24, 5)).await;
        h.notifier.set_delay(Some(std::time::Duration::from_millis(500)));

        let committed = h
            .engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await
            .unwrap();

        assert!(matches!(
            committed.notification,
            Err(classbook_core::NotificationError::Timeout(_))
        ));
        assert_eq!(h.store.pending_count().await, 1);
    }

    struct NoEntropy;

    impl TokenGenerator for NoEntropy {
        fn generate(&self, _byte_len: usize) -> Result<String, TokenError> {
            Err(TokenError::Entropy("exhausted".to_string()))
        }
    }

    #[tokio::test]
    async fn test_token_failure_aborts_request() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        let mut ctx = h.engine.pending.ctx.clone();
        ctx.tokens = std::sync::Arc::new(NoEntropy);
        let service = PendingOperationService::new(ctx.clone(), BookingLifecycle::new(ctx));

        let result = service
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await;
        assert!(matches!(result, Err(BookingError::Token(TokenError::Entropy(_)))));
        assert_eq!(h.store.pending_count().await, 0);
    }
}

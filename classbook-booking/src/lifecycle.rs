use chrono::Utc;
use classbook_core::repository::{BookingLedger, BookingRepository, ClassRepository};
use classbook_core::{
    Booking, BookingDetails, BookingError, CancellationTarget, Class, CoreResult,
    PendingOperation, StoreError,
};
use classbook_shared::Masked;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::BookingContext;
use crate::Committed;

/// Applies confirmed intents to bookings and seat capacity.
///
/// Every write path is a single ledger call, so the capacity change, the
/// booking row, the pass credit and the pending row commit together.
#[derive(Clone)]
pub struct BookingLifecycle {
    ctx: BookingContext,
}

impl BookingLifecycle {
    pub fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    async fn load_class(&self, class_id: Uuid) -> CoreResult<Class> {
        self.ctx
            .store
            .get_class(class_id)
            .await
            .map_err(BookingError::store("loading class"))?
            .ok_or(BookingError::ClassNotFound(class_id))
    }

    pub async fn confirm_booking(&self, op: &PendingOperation) -> CoreResult<Committed<BookingDetails>> {
        let now = Utc::now();
        let class = self.load_class(op.class_id).await?;
        if class.has_started(now) {
            // Capacity untouched, link kept.
            warn!(pending_id = %op.id, class_id = %class.id, "Confirmation after class start");
            return Err(BookingError::ClassExpired);
        }

        let booking = Booking::from_pending(op, now);
        match self.ctx.store.commit_confirmation(op, &booking).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(BookingError::InvalidOrExpiredLink),
            Err(StoreError::NoRowsAffected) => {
                info!(
                    class_id = %class.id,
                    email = %Masked(&booking.email),
                    "Lost the race for the last seat"
                );
                return Err(BookingError::SomeoneBookedClassFaster);
            }
            Err(StoreError::UniqueViolation(_)) => return Err(BookingError::AlreadyBooked),
            Err(e) => return Err(BookingError::store("confirming booking")(e)),
        }

        info!(
            booking_id = %booking.id,
            class_id = %class.id,
            email = %Masked(&booking.email),
            "Booking confirmed"
        );

        let details = BookingDetails::new(&booking, &class);
        let cancellation_link = self
            .ctx
            .links
            .cancel_booking(booking.id, &booking.confirmation_token);
        let notification = self
            .ctx
            .notify(
                "booking confirmation",
                self.ctx
                    .notifier
                    .send_booking_confirmed(&details, &cancellation_link),
            )
            .await;

        Ok(Committed::new(details, notification))
    }

    /// Cancels the booking a confirmed cancellation link refers to.
    pub async fn cancel_booking(&self, op: &PendingOperation) -> CoreResult<Committed<BookingDetails>> {
        let class = self.load_class(op.class_id).await?;
        let target = CancellationTarget::ClassAndEmail {
            class_id: op.class_id,
            email: op.email.clone(),
        };

        let booking = match self.ctx.store.commit_cancellation(&target, Some(op.id)).await {
            Ok(booking) => booking,
            Err(StoreError::NotFound) => return Err(BookingError::InvalidOrExpiredLink),
            Err(StoreError::NoRowsAffected) => return Err(BookingError::BookingNotFound),
            Err(e) => return Err(BookingError::store("cancelling booking")(e)),
        };

        Ok(self.announce_cancellation(&booking, &class).await)
    }

    /// Cancels through the link sent with the booking confirmation.
    pub async fn cancel_with_booking_token(
        &self,
        booking_id: Uuid,
        token: &str,
    ) -> CoreResult<Committed<BookingDetails>> {
        let details = self.get_booking_for_cancellation(booking_id, token).await?;
        let class = self.load_class(details.class_id).await?;
        let target = CancellationTarget::BookingToken {
            booking_id,
            token: token.to_string(),
        };

        let booking = match self.ctx.store.commit_cancellation(&target, None).await {
            Ok(booking) => booking,
            // Cancelled concurrently.
            Err(StoreError::NoRowsAffected) => return Err(BookingError::InvalidCancellationLink),
            Err(e) => return Err(BookingError::store("cancelling booking")(e)),
        };

        Ok(self.announce_cancellation(&booking, &class).await)
    }

    /// Owner-initiated removal. Gives the seat back like a cancellation; the
    /// attendee is only told if the class is still ahead.
    pub async fn delete_booking(&self, booking_id: Uuid) -> CoreResult<Committed<BookingDetails>> {
        let booking = self
            .ctx
            .store
            .get_booking(booking_id)
            .await
            .map_err(BookingError::store("loading booking"))?
            .ok_or(BookingError::BookingNotFound)?;
        let class = self.load_class(booking.class_id).await?;

        let removed = match self.ctx.store.commit_removal(booking_id).await {
            Ok(removed) => removed,
            Err(StoreError::NoRowsAffected) => return Err(BookingError::BookingNotFound),
            Err(e) => return Err(BookingError::store("deleting booking")(e)),
        };
        info!(booking_id = %removed.id, class_id = %class.id, "Booking removed by owner");

        let details = BookingDetails::new(&removed, &class);
        let notification = if class.has_started(Utc::now()) {
            Ok(())
        } else {
            self.ctx
                .notify(
                    "cancellation notice",
                    self.ctx.notifier.send_booking_cancelled(&details),
                )
                .await
        };

        Ok(Committed::new(details, notification))
    }

    /// Read-only check backing the cancellation screen.
    pub async fn get_booking_for_cancellation(
        &self,
        booking_id: Uuid,
        token: &str,
    ) -> CoreResult<BookingDetails> {
        let booking = self
            .ctx
            .store
            .get_booking(booking_id)
            .await
            .map_err(BookingError::store("loading booking"))?
            .filter(|b| b.confirmation_token == token)
            .ok_or(BookingError::InvalidCancellationLink)?;

        let class = self.load_class(booking.class_id).await?;
        Ok(BookingDetails::new(&booking, &class))
    }

    async fn announce_cancellation(&self, booking: &Booking, class: &Class) -> Committed<BookingDetails> {
        info!(
            booking_id = %booking.id,
            class_id = %class.id,
            email = %Masked(&booking.email),
            "Booking cancelled"
        );

        let details = BookingDetails::new(booking, class);
        let attendee = self
            .ctx
            .notify(
                "cancellation notice",
                self.ctx.notifier.send_booking_cancelled(&details),
            )
            .await;

        let owner = match &self.ctx.owner_email {
            Some(owner_email) => {
                self.ctx
                    .notify(
                        "owner cancellation notice",
                        self.ctx
                            .notifier
                            .send_owner_cancellation_notice(owner_email, &details),
                    )
                    .await
            }
            None => Ok(()),
        };

        Committed::new(details, attendee.and(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{class_in, harness, token_of, Harness, OWNER};
    use classbook_core::repository::PassRepository;
    use classbook_core::{OperationKind, Pass};
    use classbook_store::SentNotification;
    use std::sync::Arc;

    async fn book(h: &Harness, class_id: Uuid, email: &str) -> BookingDetails {
        h.engine
            .pending
            .create_pending_booking(class_id, "Jane", "Doe", email)
            .await
            .unwrap();
        h.engine
            .pending
            .confirm_booking(&h.last_token(OperationKind::CreateBooking))
            .await
            .unwrap()
            .value
    }

    fn cancel_link(h: &Harness) -> String {
        h.notifier
            .sent()
            .into_iter()
            .rev()
            .find_map(|n| match n {
                SentNotification::BookingConfirmed { cancellation_link, .. } => Some(cancellation_link),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_book_then_cancel_restores_capacity() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;

        let details = book(&h, class.id, "jane@example.com").await;
        assert_eq!(h.capacity(class.id).await, 4);
        assert_eq!(details.class_name, "Morning Flow");

        h.engine
            .pending
            .cancel_pending_booking(class.id, "jane@example.com")
            .await
            .unwrap();
        let committed = h
            .engine
            .pending
            .confirm_cancellation(&h.last_token(OperationKind::CancelBooking))
            .await
            .unwrap();

        assert!(committed.notified());
        assert_eq!(h.capacity(class.id).await, 5);
        assert_eq!(h.store.booking_count().await, 0);
        assert_eq!(h.store.pending_count().await, 0);

        let sent = h.notifier.sent();
        assert!(sent.contains(&SentNotification::BookingCancelled {
            email: "jane@example.com".to_string(),
            booking_id: details.booking_id,
        }));
        assert!(sent.contains(&SentNotification::OwnerCancellationNotice {
            owner_email: OWNER.to_string(),
            booking_id: details.booking_id,
            attendee: "Jane Doe".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;

        h.engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await
            .unwrap();
        let token = h.last_token(OperationKind::CreateBooking);

        h.engine.pending.confirm_booking(&token).await.unwrap();
        assert!(matches!(
            h.engine.pending.confirm_booking(&token).await,
            Err(BookingError::InvalidOrExpiredLink)
        ));
        assert_eq!(h.capacity(class.id).await, 4);
    }

    #[tokio::test]
    async fn test_second_link_for_same_person_is_already_booked() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        let pending = &h.engine.pending;

        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        let first = h.last_token(OperationKind::CreateBooking);
        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        let second = h.last_token(OperationKind::CreateBooking);

        pending.confirm_booking(&first).await.unwrap();
        assert!(matches!(
            pending.confirm_booking(&second).await,
            Err(BookingError::AlreadyBooked)
        ));
        assert_eq!(h.capacity(class.id).await, 4);
        assert_eq!(h.store.booking_count().await, 1);
    }

    #[tokio::test]
    async fn test_last_seat_race_is_reported() {
        let h = harness();
        let class = h.seed(class_in(24, 1)).await;
        let pending = &h.engine.pending;

        pending.create_pending_booking(class.id, "Jane", "Doe", "jane@example.com").await.unwrap();
        let jane = h.last_token(OperationKind::CreateBooking);
        pending.create_pending_booking(class.id, "John", "Roe", "john@example.com").await.unwrap();
        let john = h.last_token(OperationKind::CreateBooking);

        pending.confirm_booking(&jane).await.unwrap();
        assert!(matches!(
            pending.confirm_booking(&john).await,
            Err(BookingError::SomeoneBookedClassFaster)
        ));
        // The losing link survives for a retry once a seat frees up.
        assert!(pending.resolve(&john, OperationKind::CreateBooking).await.is_ok());
        assert_eq!(h.capacity(class.id).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_never_overbook() {
        let h = harness();
        let seats = 3;
        let class = h.seed(class_in(24, seats)).await;

        let mut tokens = Vec::new();
        for i in 0..12 {
            h.engine
                .pending
                .create_pending_booking(class.id, "Guest", "Attendee", &format!("guest{}@example.com", i))
                .await
                .unwrap();
            tokens.push(h.last_token(OperationKind::CreateBooking));
        }

        let engine = Arc::new(h.engine.clone());
        let handles: Vec<_> = tokens
            .into_iter()
            .map(|token| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.pending.confirm_booking(&token).await })
            })
            .collect();

        let mut confirmed = 0;
        let mut lost = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => confirmed += 1,
                Err(BookingError::SomeoneBookedClassFaster) => lost += 1,
                Err(e) => panic!("unexpected error {}", e),
            }
        }

        assert_eq!(confirmed, seats);
        assert_eq!(lost, 12 - seats);
        assert_eq!(h.capacity(class.id).await, 0);
        assert_eq!(h.store.booking_count().await, seats as usize);
    }

    #[tokio::test]
    async fn test_confirmation_after_start_keeps_link() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        h.engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await
            .unwrap();
        let token = h.last_token(OperationKind::CreateBooking);

        let mut started = class.clone();
        started.starts_at = Utc::now() - chrono::Duration::minutes(5);
        h.store.put_class(started).await;

        assert!(matches!(
            h.engine.pending.confirm_booking(&token).await,
            Err(BookingError::ClassExpired)
        ));
        assert_eq!(h.capacity(class.id).await, 5);
        assert_eq!(h.store.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_without_booking_keeps_link() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;

        h.engine
            .pending
            .cancel_pending_booking(class.id, "jane@example.com")
            .await
            .unwrap();
        let token = h.last_token(OperationKind::CancelBooking);

        assert!(matches!(
            h.engine.pending.confirm_cancellation(&token).await,
            Err(BookingError::BookingNotFound)
        ));
        assert_eq!(h.store.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_with_booking_token() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        let details = book(&h, class.id, "jane@example.com").await;

        let link = cancel_link(&h);
        assert!(link.starts_with(&format!("https://studio.test/bookings/{}?token=", details.booking_id)));
        let token = token_of(&link);

        let lifecycle = &h.engine.lifecycle;
        assert!(matches!(
            lifecycle.get_booking_for_cancellation(details.booking_id, "wrong").await,
            Err(BookingError::InvalidCancellationLink)
        ));
        let shown = lifecycle
            .get_booking_for_cancellation(details.booking_id, &token)
            .await
            .unwrap();
        assert_eq!(shown, details);

        lifecycle
            .cancel_with_booking_token(details.booking_id, &token)
            .await
            .unwrap();
        assert_eq!(h.capacity(class.id).await, 5);
        assert!(matches!(
            lifecycle.cancel_with_booking_token(details.booking_id, &token).await,
            Err(BookingError::InvalidCancellationLink)
        ));
    }

    #[tokio::test]
    async fn test_force_delete_restores_seat_and_notifies() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        let details = book(&h, class.id, "jane@example.com").await;

        let committed = h.engine.lifecycle.delete_booking(details.booking_id).await.unwrap();
        assert!(committed.notified());
        assert_eq!(h.capacity(class.id).await, 5);
        assert!(h.notifier.sent().contains(&SentNotification::BookingCancelled {
            email: "jane@example.com".to_string(),
            booking_id: details.booking_id,
        }));

        assert!(matches!(
            h.engine.lifecycle.delete_booking(details.booking_id).await,
            Err(BookingError::BookingNotFound)
        ));
    }

    #[tokio::test]
    async fn test_force_delete_of_past_class_is_silent() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        let details = book(&h, class.id, "jane@example.com").await;

        let mut started = class.clone();
        started.starts_at = Utc::now() - chrono::Duration::hours(1);
        started.current_capacity = 4;
        h.store.put_class(started).await;

        let before = h.notifier.sent().len();
        h.engine.lifecycle.delete_booking(details.booking_id).await.unwrap();
        assert_eq!(h.notifier.sent().len(), before);
        assert_eq!(h.capacity(class.id).await, 5);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_booking() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        h.engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await
            .unwrap();
        let token = h.last_token(OperationKind::CreateBooking);

        h.notifier.set_failing(true);
        let committed = h.engine.pending.confirm_booking(&token).await.unwrap();

        assert!(!committed.notified());
        assert_eq!(h.store.booking_count().await, 1);
        assert_eq!(h.capacity(class.id).await, 4);
    }

    #[tokio::test]
    async fn test_pass_credit_follows_booking() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;

        let mut pass = Pass::new("jane@example.com", 2, Utc::now() - chrono::Duration::days(1));
        pass.activate(&[], Utc::now());
        h.store.insert_pass(&pass).await.unwrap();

        let details = book(&h, class.id, "jane@example.com").await;
        let used = h.store.get_pass(pass.id).await.unwrap().unwrap();
        assert_eq!(used.used_credits, 1);
        assert_eq!(used.used_booking_ids, vec![details.booking_id]);

        h.engine.lifecycle.delete_booking(details.booking_id).await.unwrap();
        let released = h.store.get_pass(pass.id).await.unwrap().unwrap();
        assert_eq!(released.used_credits, 0);
        assert!(released.used_booking_ids.is_empty());
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, CancellationTarget};
use crate::class::{Class, NewClass};
use crate::error::StoreResult;
use crate::pass::Pass;
use crate::pending::PendingOperation;

/// Class data access. The capacity methods are the only writers of
/// `current_capacity`.
#[async_trait]
pub trait ClassRepository: Send + Sync {
    async fn get_class(&self, id: Uuid) -> StoreResult<Option<Class>>;

    async fn insert_many(&self, classes: &[NewClass]) -> StoreResult<Vec<Class>>;

    /// Takes one seat if any is left, checked and written in one step.
    /// Returns `StoreError::NoRowsAffected` when no seat was free.
    async fn decrement_capacity(&self, id: Uuid) -> StoreResult<()>;

    /// Gives one seat back unless the class is already at `max_capacity`.
    async fn increment_capacity(&self, id: Uuid) -> StoreResult<()>;

    async fn list_upcoming(&self, now: DateTime<Utc>) -> StoreResult<Vec<Class>>;

    /// Fails with `ForeignKeyViolation` while bookings reference the class.
    async fn delete_class(&self, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn get_by_email_and_class(
        &self,
        class_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Booking>>;

    async fn count_for_class(&self, class_id: Uuid) -> StoreResult<i64>;

    /// Plain insert with no capacity accounting. Confirmations go through
    /// [`BookingLedger::commit_confirmation`].
    async fn insert_booking(&self, booking: &Booking) -> StoreResult<Uuid>;

    async fn delete_booking(&self, id: Uuid) -> StoreResult<()>;

    async fn list_for_class(&self, class_id: Uuid) -> StoreResult<Vec<Booking>>;

    async fn list_for_email(&self, email: &str) -> StoreResult<Vec<Booking>>;
}

#[async_trait]
pub trait PendingOperationRepository: Send + Sync {
    /// Token uniqueness is enforced by the store (`UniqueViolation`).
    async fn insert_pending(&self, op: &PendingOperation) -> StoreResult<()>;

    async fn get_by_token(&self, token: &str) -> StoreResult<Option<PendingOperation>>;

    async fn delete_pending(&self, id: Uuid) -> StoreResult<()>;

    async fn count_for_user_and_class(&self, email: &str, class_id: Uuid) -> StoreResult<i64>;

    /// Removes operations whose expiry lies before `now`; returns how many.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait PassRepository: Send + Sync {
    async fn insert_pass(&self, pass: &Pass) -> StoreResult<()>;

    async fn get_pass(&self, id: Uuid) -> StoreResult<Option<Pass>>;

    async fn get_active_for_email(&self, email: &str) -> StoreResult<Option<Pass>>;

    /// Persists the recomputed usage of a pass that was not active yet.
    /// `NoRowsAffected` if it was activated concurrently.
    async fn save_activation(&self, pass: &Pass) -> StoreResult<()>;
}

/// Multi-row state transitions that must commit together or not at all.
///
/// Each method consumes the pending operation (when given) inside the same
/// transaction, so a token is only spent once its effect is durable.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Consumes `pending`, takes a seat, inserts `booking` and spends one
    /// credit of the attendee's active pass if any is left.
    ///
    /// Errors: `NotFound` if the pending operation was already consumed,
    /// `NoRowsAffected` if no seat was left, `UniqueViolation` if the attendee
    /// already holds a booking for the class.
    async fn commit_confirmation(
        &self,
        pending: &PendingOperation,
        booking: &Booking,
    ) -> StoreResult<()>;

    /// Deletes the targeted booking, gives its seat back and releases any pass
    /// credit it held. Returns the removed booking.
    ///
    /// Errors: `NotFound` if `pending_id` was already consumed,
    /// `NoRowsAffected` if no booking matched the target.
    async fn commit_cancellation(
        &self,
        target: &CancellationTarget,
        pending_id: Option<Uuid>,
    ) -> StoreResult<Booking>;

    /// Owner-initiated removal: same effects as a cancellation without any
    /// token check. `NoRowsAffected` if the booking does not exist.
    async fn commit_removal(&self, booking_id: Uuid) -> StoreResult<Booking>;
}

/// Everything the booking engine needs from persistence.
pub trait Store:
    ClassRepository + BookingRepository + PendingOperationRepository + PassRepository + BookingLedger
{
}

impl<T> Store for T where
    T: ClassRepository
        + BookingRepository
        + PendingOperationRepository
        + PassRepository
        + BookingLedger
{
}

use std::time::Duration;
use uuid::Uuid;

use crate::pending::OperationKind;

/// Failures reported by the persistent store contracts.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    /// A guarded single-row statement matched nothing.
    #[error("No rows affected")]
    NoRowsAffected,

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token length of {requested} bytes is below the minimum of {minimum}")]
    TooShort { requested: usize, minimum: usize },

    #[error("Entropy source failure: {0}")]
    Entropy(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Notification timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcomes of the booking workflow.
///
/// Everything except `Token` and `Store` is an expected business result that
/// callers branch on; none of them are retried by the engine.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("This class is fully booked")]
    ClassFullyBooked,

    #[error("Someone booked the last seat faster than you")]
    SomeoneBookedClassFaster,

    #[error("This class has already started")]
    ClassExpired,

    #[error("Too many pending requests for this class, please check your email for an existing link")]
    TooManyPendingOperations,

    #[error("You already have a booking for this class, please contact the studio if this is unexpected")]
    BookingAlreadyExists,

    #[error("This booking has already been confirmed, please contact the studio if this is unexpected")]
    AlreadyBooked,

    #[error("Booking not found")]
    BookingNotFound,

    #[error("This link is invalid or has expired")]
    InvalidOrExpiredLink,

    #[error("This cancellation link is invalid")]
    InvalidCancellationLink,

    #[error("Link is for {found}, expected {expected}")]
    InvalidOperationType {
        expected: OperationKind,
        found: OperationKind,
    },

    #[error("Class not found: {0}")]
    ClassNotFound(Uuid),

    #[error("Class {0} still has bookings")]
    ClassHasBookings(Uuid),

    #[error("Pass not found: {0}")]
    PassNotFound(Uuid),

    #[error("Pass {0} is already active")]
    PassAlreadyActive(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Token generation failed: {0}")]
    Token(#[from] TokenError),

    #[error("Store failure while {context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl BookingError {
    /// Wraps an unexpected store failure with the operation that hit it.
    pub fn store(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { context, source }
    }

    /// Token and identifier mismatches that are shown to users as one
    /// generic "link invalid" message.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            Self::BookingNotFound
                | Self::InvalidOrExpiredLink
                | Self::InvalidCancellationLink
                | Self::InvalidOperationType { .. }
        )
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Token(_) | Self::Store { .. })
    }
}

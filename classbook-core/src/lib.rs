pub mod booking;
pub mod class;
pub mod error;
pub mod notification;
pub mod pass;
pub mod pending;
pub mod repository;
pub mod token;

pub use booking::{Booking, BookingDetails, CancellationTarget};
pub use class::{Class, NewClass};
pub use error::{BookingError, NotificationError, StoreError, StoreResult, TokenError};
pub use notification::NotificationPort;
pub use pass::Pass;
pub use pending::{OperationKind, PendingOperation};
pub use repository::Store;
pub use token::{OsTokenGenerator, TokenGenerator};

pub type CoreResult<T> = Result<T, BookingError>;

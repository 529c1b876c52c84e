pub mod context;
pub mod lifecycle;
pub mod passes;
pub mod pending;
pub mod schedule;

#[cfg(test)]
pub(crate) mod testing;

pub use context::BookingContext;
pub use lifecycle::BookingLifecycle;
pub use passes::PassService;
pub use pending::PendingOperationService;
pub use schedule::{ClassSchedule, ClassScheduler};

use classbook_core::NotificationError;

/// Result of a state change that has been committed and then announced.
///
/// `notification` carries the outcome of the follow-up message. A failure
/// there never undoes `value`.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub notification: Result<(), NotificationError>,
}

impl<T> Committed<T> {
    pub fn new(value: T, notification: Result<(), NotificationError>) -> Self {
        Self { value, notification }
    }

    pub fn notified(&self) -> bool {
        self.notification.is_ok()
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Committed<U> {
        Committed {
            value: f(self.value),
            notification: self.notification,
        }
    }
}

/// All booking services over one shared context.
#[derive(Clone)]
pub struct BookingEngine {
    pub pending: PendingOperationService,
    pub lifecycle: BookingLifecycle,
    pub passes: PassService,
    pub schedule: ClassScheduler,
}

impl BookingEngine {
    pub fn new(ctx: BookingContext) -> Self {
        let lifecycle = BookingLifecycle::new(ctx.clone());
        Self {
            pending: PendingOperationService::new(ctx.clone(), lifecycle.clone()),
            lifecycle,
            passes: PassService::new(ctx.clone()),
            schedule: ClassScheduler::new(ctx),
        }
    }
}

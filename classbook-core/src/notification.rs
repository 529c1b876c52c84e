use async_trait::async_trait;

use crate::booking::BookingDetails;
use crate::error::NotificationError;
use crate::pass::Pass;
use crate::pending::OperationKind;

/// Outbound channel for attendee and owner notices.
///
/// Called after a state change has committed; an error here is reported to
/// the caller but never rolls the change back.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Send the double-opt-in link for a pending operation.
    async fn send_confirmation_link(
        &self,
        email: &str,
        first_name: &str,
        kind: OperationKind,
        link: &str,
    ) -> Result<(), NotificationError>;

    async fn send_booking_confirmed(
        &self,
        details: &BookingDetails,
        cancellation_link: &str,
    ) -> Result<(), NotificationError>;

    async fn send_booking_cancelled(&self, details: &BookingDetails) -> Result<(), NotificationError>;

    /// Tell the studio owner who dropped out of which slot.
    async fn send_owner_cancellation_notice(
        &self,
        owner_email: &str,
        details: &BookingDetails,
    ) -> Result<(), NotificationError>;

    async fn send_pass_activated(&self, pass: &Pass) -> Result<(), NotificationError>;
}

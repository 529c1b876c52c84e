use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::class::Class;
use crate::pending::PendingOperation;

/// A confirmed reservation. Unique per (class, email).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: Uuid,
    pub class_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Token of the pending operation that created this booking; it also
    /// authorizes the cancellation link sent with the confirmation.
    pub confirmation_token: String,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn from_pending(op: &PendingOperation, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_id: op.class_id,
            email: op.email.clone(),
            first_name: op.first_name.clone(),
            last_name: op.last_name.clone(),
            confirmation_token: op.token.clone(),
            created_at: now,
        }
    }
}

/// Which booking row a cancellation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationTarget {
    ClassAndEmail { class_id: Uuid, email: String },
    BookingToken { booking_id: Uuid, token: String },
}

/// Booking joined with its class, as shown to attendees and the owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingDetails {
    pub booking_id: Uuid,
    pub class_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub class_name: String,
    pub level: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
}

impl BookingDetails {
    pub fn new(booking: &Booking, class: &Class) -> Self {
        Self {
            booking_id: booking.id,
            class_id: class.id,
            email: booking.email.clone(),
            first_name: booking.first_name.clone(),
            last_name: booking.last_name.clone(),
            class_name: class.name.clone(),
            level: class.level.clone(),
            location: class.location.clone(),
            starts_at: class.starts_at,
        }
    }

    pub fn attendee_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

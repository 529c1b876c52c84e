use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BookingError;

/// A scheduled session with a fixed number of seats.
///
/// `current_capacity` is only ever changed by the guarded capacity updates of
/// the class repository, never assigned directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Class {
    pub id: Uuid,
    pub name: String,
    pub level: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub max_capacity: i32,
    pub current_capacity: i32,
    pub created_at: DateTime<Utc>,
}

impl Class {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at < now
    }

    pub fn is_fully_booked(&self) -> bool {
        self.current_capacity <= 0
    }

    pub fn booked_seats(&self) -> i32 {
        self.max_capacity - self.current_capacity
    }
}

/// Input for bulk class creation. Seats start out fully available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClass {
    pub name: String,
    pub level: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub max_capacity: i32,
}

impl NewClass {
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.name.trim().is_empty() {
            return Err(BookingError::Validation("class name must not be empty".to_string()));
        }
        if self.max_capacity <= 0 {
            return Err(BookingError::Validation(format!(
                "class capacity must be positive, got {}",
                self.max_capacity
            )));
        }
        Ok(())
    }

    pub fn into_class(self, now: DateTime<Utc>) -> Class {
        Class {
            id: Uuid::new_v4(),
            name: self.name,
            level: self.level,
            location: self.location,
            starts_at: self.starts_at,
            max_capacity: self.max_capacity,
            current_capacity: self.max_capacity,
            created_at: now,
        }
    }
}

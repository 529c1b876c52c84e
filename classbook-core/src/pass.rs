use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::Booking;
use classbook_shared::normalize_email;

/// A pre-paid bundle of class credits tied to an email address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pass {
    pub id: Uuid,
    pub email: String,
    pub total_credits: i32,
    pub used_credits: i32,
    pub used_booking_ids: Vec<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Pass {
    pub fn new(email: &str, total_credits: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            total_credits,
            used_credits: 0,
            used_booking_ids: Vec::new(),
            is_active: false,
            created_at: now,
            activated_at: None,
        }
    }

    pub fn remaining_credits(&self) -> i32 {
        self.total_credits - self.used_credits
    }

    pub fn has_credit(&self) -> bool {
        self.is_active && self.used_credits < self.total_credits
    }

    /// Rebuilds the consumed set from the attendee's booking history: bookings
    /// made since the pass was issued, oldest first, up to the credit limit.
    pub fn activate(&mut self, history: &[Booking], now: DateTime<Utc>) {
        let mut eligible: Vec<&Booking> = history
            .iter()
            .filter(|b| b.email == self.email && b.created_at >= self.created_at)
            .collect();
        eligible.sort_by_key(|b| b.created_at);

        self.used_booking_ids = eligible
            .into_iter()
            .take(self.total_credits.max(0) as usize)
            .map(|b| b.id)
            .collect();
        self.used_credits = self.used_booking_ids.len() as i32;
        self.is_active = true;
        self.activated_at = Some(now);
    }
}

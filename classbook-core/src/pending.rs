use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use classbook_shared::normalize_email;

/// What a confirmation link will do once its token is resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    CreateBooking,
    CancelBooking,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateBooking => "CREATE_BOOKING",
            OperationKind::CancelBooking => "CANCEL_BOOKING",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE_BOOKING" => Ok(OperationKind::CreateBooking),
            "CANCEL_BOOKING" => Ok(OperationKind::CancelBooking),
            other => Err(format!("unknown operation kind: {}", other)),
        }
    }
}

/// A single-use authorization envelope for a booking or cancellation intent.
///
/// The row is deleted when its token is resolved successfully.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingOperation {
    pub id: Uuid,
    pub class_id: Uuid,
    pub kind: OperationKind,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    /// `None` means the link never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        class_id: Uuid,
        kind: OperationKind,
        email: &str,
        first_name: &str,
        last_name: &str,
        token: String,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_id,
            kind,
            email: normalize_email(email),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            token,
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_normalized() {
        let op = PendingOperation::new(
            Uuid::new_v4(),
            OperationKind::CreateBooking,
            " Jane@Example.com",
            "Jane",
            "Doe",
            "tok".to_string(),
            Utc::now(),
            None,
        );
        assert_eq!(op.email, "jane@example.com");
    }

    #[test]
    fn test_expiry_only_applies_with_ttl() {
        let now = Utc::now();
        let permanent = PendingOperation::new(
            Uuid::new_v4(),
            OperationKind::CreateBooking,
            "a@b.c",
            "A",
            "B",
            "t1".to_string(),
            now,
            None,
        );
        assert!(!permanent.is_expired(now + Duration::days(365)));

        let short = PendingOperation::new(
            Uuid::new_v4(),
            OperationKind::CancelBooking,
            "a@b.c",
            "A",
            "B",
            "t2".to_string(),
            now,
            Some(Duration::minutes(30)),
        );
        assert!(!short.is_expired(now + Duration::minutes(29)));
        assert!(short.is_expired(now + Duration::minutes(31)));
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [OperationKind::CreateBooking, OperationKind::CancelBooking] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("DELETE".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&OperationKind::CancelBooking).unwrap();
        assert_eq!(json, "\"CANCEL_BOOKING\"");
    }
}

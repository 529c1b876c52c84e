use chrono::{DateTime, Duration, Utc};
use classbook_core::repository::{BookingRepository, ClassRepository};
use classbook_core::{Booking, BookingError, Class, CoreResult, NewClass, StoreError};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::context::BookingContext;

const MAX_OCCURRENCES: u32 = 366;

/// A recurring slot, expanded into one class per occurrence.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassSchedule {
    pub name: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub location: String,
    pub max_capacity: i32,
    pub first_starts_at: DateTime<Utc>,
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,
    pub occurrences: u32,
}

fn default_interval_days() -> u32 {
    7
}

impl ClassSchedule {
    pub fn expand(&self) -> CoreResult<Vec<NewClass>> {
        if self.occurrences == 0 || self.occurrences > MAX_OCCURRENCES {
            return Err(BookingError::Validation(format!(
                "occurrences must be between 1 and {}",
                MAX_OCCURRENCES
            )));
        }
        if self.occurrences > 1 && self.interval_days == 0 {
            return Err(BookingError::Validation(
                "interval_days must be positive for repeated classes".to_string(),
            ));
        }

        (0..self.occurrences)
            .map(|i| -> CoreResult<NewClass> {
                Ok(NewClass {
                    name: self.name.clone(),
                    level: self.level.clone(),
                    location: self.location.clone(),
                    starts_at: self.occurrence_start(i)?,
                    max_capacity: self.max_capacity,
                })
            })
            .collect()
    }

    fn occurrence_start(&self, index: u32) -> CoreResult<DateTime<Utc>> {
        Duration::try_days(i64::from(index) * i64::from(self.interval_days))
            .and_then(|offset| self.first_starts_at.checked_add_signed(offset))
            .ok_or_else(|| {
                BookingError::Validation("schedule runs past the supported date range".to_string())
            })
    }
}

/// Owner-side class management.
#[derive(Clone)]
pub struct ClassScheduler {
    ctx: BookingContext,
}

impl ClassScheduler {
    pub fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    /// Validates and inserts classes as one batch.
    pub async fn schedule_classes(&self, classes: Vec<NewClass>) -> CoreResult<Vec<Class>> {
        if classes.is_empty() {
            return Err(BookingError::Validation("no classes given".to_string()));
        }
        for class in &classes {
            class.validate()?;
        }

        let inserted = self
            .ctx
            .store
            .insert_many(&classes)
            .await
            .map_err(BookingError::store("inserting classes"))?;

        info!(count = inserted.len(), "Classes scheduled");
        Ok(inserted)
    }

    pub async fn list_upcoming_classes(&self, now: DateTime<Utc>) -> CoreResult<Vec<Class>> {
        self.ctx
            .store
            .list_upcoming(now)
            .await
            .map_err(BookingError::store("listing classes"))
    }

    /// Refused while the class still has bookings.
    pub async fn delete_class(&self, class_id: Uuid) -> CoreResult<()> {
        let store = &self.ctx.store;
        let booked = store
            .count_for_class(class_id)
            .await
            .map_err(BookingError::store("counting bookings"))?;
        if booked > 0 {
            return Err(BookingError::ClassHasBookings(class_id));
        }

        match store.delete_class(class_id).await {
            Ok(()) => {}
            Err(StoreError::NoRowsAffected) => return Err(BookingError::ClassNotFound(class_id)),
            // Booked between the count and the delete.
            Err(StoreError::ForeignKeyViolation(_)) => {
                return Err(BookingError::ClassHasBookings(class_id))
            }
            Err(e) => return Err(BookingError::store("deleting class")(e)),
        }

        info!(%class_id, "Class deleted");
        Ok(())
    }

    pub async fn list_bookings_for_class(&self, class_id: Uuid) -> CoreResult<Vec<Booking>> {
        let store = &self.ctx.store;
        store
            .get_class(class_id)
            .await
            .map_err(BookingError::store("loading class"))?
            .ok_or(BookingError::ClassNotFound(class_id))?;

        store
            .list_for_class(class_id)
            .await
            .map_err(BookingError::store("listing bookings"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{class_in, harness};
    use chrono::TimeZone;
    use classbook_core::OperationKind;

    fn weekly(occurrences: u32) -> ClassSchedule {
        ClassSchedule {
            name: "Evening Yin".to_string(),
            level: "All levels".to_string(),
            location: "Studio B".to_string(),
            max_capacity: 12,
            first_starts_at: Utc.with_ymd_and_hms(2031, 1, 6, 18, 0, 0).unwrap(),
            interval_days: 7,
            occurrences,
        }
    }

    #[test]
    fn test_schedule_expands_weekly() {
        let classes = weekly(3).expand().unwrap();
        assert_eq!(classes.len(), 3);
        assert_eq!(
            classes[2].starts_at,
            Utc.with_ymd_and_hms(2031, 1, 20, 18, 0, 0).unwrap()
        );
        assert!(classes.iter().all(|c| c.max_capacity == 12));
    }

    #[test]
    fn test_schedule_rejects_empty_or_zero_interval() {
        assert!(weekly(0).expand().is_err());
        let mut schedule = weekly(2);
        schedule.interval_days = 0;
        assert!(schedule.expand().is_err());
        schedule.occurrences = 1;
        assert_eq!(schedule.expand().unwrap().len(), 1);
    }

    #[test]
    fn test_schedule_body_defaults_to_weekly() {
        let schedule: ClassSchedule = serde_json::from_value(serde_json::json!({
            "name": "Morning Flow",
            "max_capacity": 10,
            "first_starts_at": "2031-01-06T08:00:00Z",
            "occurrences": 2
        }))
        .unwrap();

        assert_eq!(schedule.interval_days, 7);
        assert!(schedule.level.is_empty());
        let classes = schedule.expand().unwrap();
        assert_eq!(
            classes[1].starts_at,
            Utc.with_ymd_and_hms(2031, 1, 13, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_schedule_out_of_date_range_is_rejected() {
        let mut schedule = weekly(2);
        schedule.interval_days = 4_000_000_000;
        assert!(matches!(schedule.expand(), Err(BookingError::Validation(_))));

        schedule.interval_days = 7;
        schedule.first_starts_at = DateTime::<Utc>::MAX_UTC - Duration::days(3);
        assert!(matches!(schedule.expand(), Err(BookingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_scheduled_classes_are_listed_in_order() {
        let h = harness();
        let scheduler = &h.engine.schedule;
        let inserted = scheduler.schedule_classes(weekly(4).expand().unwrap()).await.unwrap();
        assert!(inserted.iter().all(|c| c.current_capacity == c.max_capacity));

        let upcoming = scheduler
            .list_upcoming_classes(Utc.with_ymd_and_hms(2031, 1, 10, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(upcoming.len(), 3);
        assert!(upcoming.windows(2).all(|w| w[0].starts_at <= w[1].starts_at));
    }

    #[tokio::test]
    async fn test_invalid_batch_inserts_nothing() {
        let h = harness();
        let mut classes = weekly(2).expand().unwrap();
        classes[1].max_capacity = 0;

        assert!(matches!(
            h.engine.schedule.schedule_classes(classes).await,
            Err(BookingError::Validation(_))
        ));
        let all = h
            .engine
            .schedule
            .list_upcoming_classes(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_delete_class_with_bookings_is_refused() {
        let h = harness();
        let class = h.seed(class_in(24, 5)).await;
        h.engine
            .pending
            .create_pending_booking(class.id, "Jane", "Doe", "jane@example.com")
            .await
            .unwrap();
        let details = h
            .engine
            .pending
            .confirm_booking(&h.last_token(OperationKind::CreateBooking))
            .await
            .unwrap()
            .value;

        let roster = h.engine.schedule.list_bookings_for_class(class.id).await.unwrap();
        assert_eq!(roster.len(), 1);

        assert!(matches!(
            h.engine.schedule.delete_class(class.id).await,
            Err(BookingError::ClassHasBookings(_))
        ));

        h.engine.lifecycle.delete_booking(details.booking_id).await.unwrap();
        h.engine.schedule.delete_class(class.id).await.unwrap();
        assert!(matches!(
            h.engine.schedule.delete_class(class.id).await,
            Err(BookingError::ClassNotFound(_))
        ));
    }
}

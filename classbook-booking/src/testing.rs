use chrono::{Duration, Utc};
use classbook_core::{Class, NewClass, OsTokenGenerator};
use classbook_shared::LinkBuilder;
use classbook_store::app_config::BookingRules;
use classbook_store::{MemoryStore, RecordingNotifier};
use std::sync::Arc;

use crate::{BookingContext, BookingEngine};

pub(crate) const OWNER: &str = "owner@studio.test";

pub(crate) struct Harness {
    pub engine: BookingEngine,
    pub store: MemoryStore,
    pub notifier: RecordingNotifier,
}

pub(crate) fn links() -> LinkBuilder {
    LinkBuilder {
        confirm_booking_url: "https://studio.test/bookings/confirm".to_string(),
        confirm_cancellation_url: "https://studio.test/cancellations/confirm".to_string(),
        cancel_booking_url: "https://studio.test/bookings".to_string(),
    }
}

pub(crate) fn harness_with(rules: BookingRules) -> Harness {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::new();
    let ctx = BookingContext::new(
        Arc::new(store.clone()),
        Arc::new(notifier.clone()),
        Arc::new(OsTokenGenerator),
        links(),
        rules,
    )
    .with_owner_email(OWNER);

    Harness {
        engine: BookingEngine::new(ctx),
        store,
        notifier,
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(BookingRules::default())
}

pub(crate) fn class_in(hours: i64, seats: i32) -> Class {
    NewClass {
        name: "Morning Flow".to_string(),
        level: "Beginner".to_string(),
        location: "Studio A".to_string(),
        starts_at: Utc::now() + Duration::hours(hours),
        max_capacity: seats,
    }
    .into_class(Utc::now())
}

/// Token carried by a link built from [`links`].
pub(crate) fn token_of(link: &str) -> String {
    link.rsplit("token=").next().unwrap_or_default().to_string()
}

impl Harness {
    pub(crate) async fn seed(&self, class: Class) -> Class {
        self.store.put_class(class.clone()).await;
        class
    }

    pub(crate) async fn capacity(&self, class_id: uuid::Uuid) -> i32 {
        use classbook_core::repository::ClassRepository;
        self.store
            .get_class(class_id)
            .await
            .unwrap()
            .unwrap()
            .current_capacity
    }

    /// Token of the most recent link of `kind`.
    pub(crate) fn last_token(&self, kind: classbook_core::OperationKind) -> String {
        let links = self.notifier.links(kind);
        token_of(links.last().expect("no link was sent"))
    }
}

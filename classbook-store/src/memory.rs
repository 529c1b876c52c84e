//! In-process implementations of the store and notification contracts.
//!
//! `MemoryStore` keeps every table behind one async mutex; each trait method
//! does its checks and writes under a single lock acquisition, which gives
//! the same all-or-nothing behaviour as the Postgres transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook_core::repository::{
    BookingLedger, BookingRepository, ClassRepository, PassRepository, PendingOperationRepository,
};
use classbook_core::{
    Booking, BookingDetails, CancellationTarget, Class, NewClass, NotificationError,
    NotificationPort, OperationKind, Pass, PendingOperation, StoreError, StoreResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    classes: HashMap<Uuid, Class>,
    bookings: HashMap<Uuid, Booking>,
    pending: HashMap<Uuid, PendingOperation>,
    passes: HashMap<Uuid, Pass>,
}

impl Tables {
    fn decrement(&mut self, class_id: Uuid) -> StoreResult<()> {
        match self.classes.get_mut(&class_id) {
            Some(class) if class.current_capacity > 0 => {
                class.current_capacity -= 1;
                Ok(())
            }
            _ => Err(StoreError::NoRowsAffected),
        }
    }

    fn increment(&mut self, class_id: Uuid) -> StoreResult<()> {
        match self.classes.get_mut(&class_id) {
            Some(class) if class.current_capacity < class.max_capacity => {
                class.current_capacity += 1;
                Ok(())
            }
            _ => Err(StoreError::NoRowsAffected),
        }
    }

    fn booking_exists(&self, class_id: Uuid, email: &str) -> bool {
        self.bookings
            .values()
            .any(|b| b.class_id == class_id && b.email == email)
    }

    fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        if !self.classes.contains_key(&booking.class_id) {
            return Err(StoreError::ForeignKeyViolation("bookings_class_id_fkey".to_string()));
        }
        if self.booking_exists(booking.class_id, &booking.email) {
            return Err(StoreError::UniqueViolation("bookings_class_email_key".to_string()));
        }
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    /// Oldest active pass with a free credit.
    fn pass_with_credit(&mut self, email: &str) -> Option<&mut Pass> {
        self.passes
            .values_mut()
            .filter(|p| p.email == email && p.has_credit())
            .min_by_key(|p| p.created_at)
    }

    fn release(&mut self, booking: &Booking) {
        // Guard miss mirrors the Postgres path: logged, not an error.
        if self.increment(booking.class_id).is_err() {
            tracing::warn!(
                "Class {} already at max capacity while releasing booking {}",
                booking.class_id,
                booking.id
            );
        }
        for pass in self.passes.values_mut() {
            if let Some(pos) = pass.used_booking_ids.iter().position(|id| *id == booking.id) {
                pass.used_booking_ids.remove(pos);
                pass.used_credits -= 1;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a class exactly as given, capacity included.
    pub async fn put_class(&self, class: Class) {
        self.tables.lock().await.classes.insert(class.id, class);
    }

    pub async fn pending_count(&self) -> usize {
        self.tables.lock().await.pending.len()
    }

    pub async fn booking_count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }
}

#[async_trait]
impl ClassRepository for MemoryStore {
    async fn get_class(&self, id: Uuid) -> StoreResult<Option<Class>> {
        Ok(self.tables.lock().await.classes.get(&id).cloned())
    }

    async fn insert_many(&self, classes: &[NewClass]) -> StoreResult<Vec<Class>> {
        let now = Utc::now();
        let inserted: Vec<Class> = classes.iter().map(|c| c.clone().into_class(now)).collect();

        let mut tables = self.tables.lock().await;
        for class in &inserted {
            tables.classes.insert(class.id, class.clone());
        }
        Ok(inserted)
    }

    async fn decrement_capacity(&self, id: Uuid) -> StoreResult<()> {
        self.tables.lock().await.decrement(id)
    }

    async fn increment_capacity(&self, id: Uuid) -> StoreResult<()> {
        self.tables.lock().await.increment(id)
    }

    async fn list_upcoming(&self, now: DateTime<Utc>) -> StoreResult<Vec<Class>> {
        let tables = self.tables.lock().await;
        let mut classes: Vec<Class> = tables
            .classes
            .values()
            .filter(|c| c.starts_at >= now)
            .cloned()
            .collect();
        classes.sort_by_key(|c| c.starts_at);
        Ok(classes)
    }

    async fn delete_class(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.bookings.values().any(|b| b.class_id == id) {
            return Err(StoreError::ForeignKeyViolation("bookings_class_id_fkey".to_string()));
        }
        if tables.classes.remove(&id).is_none() {
            return Err(StoreError::NoRowsAffected);
        }
        tables.pending.retain(|_, op| op.class_id != id);
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.tables.lock().await.bookings.get(&id).cloned())
    }

    async fn get_by_email_and_class(
        &self,
        class_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Booking>> {
        Ok(self
            .tables
            .lock()
            .await
            .bookings
            .values()
            .find(|b| b.class_id == class_id && b.email == email)
            .cloned())
    }

    async fn count_for_class(&self, class_id: Uuid) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.bookings.values().filter(|b| b.class_id == class_id).count() as i64)
    }

    async fn insert_booking(&self, booking: &Booking) -> StoreResult<Uuid> {
        self.tables.lock().await.insert_booking(booking)?;
        Ok(booking.id)
    }

    async fn delete_booking(&self, id: Uuid) -> StoreResult<()> {
        match self.tables.lock().await.bookings.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NoRowsAffected),
        }
    }

    async fn list_for_class(&self, class_id: Uuid) -> StoreResult<Vec<Booking>> {
        let tables = self.tables.lock().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.class_id == class_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn list_for_email(&self, email: &str) -> StoreResult<Vec<Booking>> {
        let tables = self.tables.lock().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.email == email)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }
}

#[async_trait]
impl PendingOperationRepository for MemoryStore {
    async fn insert_pending(&self, op: &PendingOperation) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.pending.values().any(|p| p.token == op.token) {
            return Err(StoreError::UniqueViolation("pending_operations_token_key".to_string()));
        }
        tables.pending.insert(op.id, op.clone());
        Ok(())
    }

    async fn get_by_token(&self, token: &str) -> StoreResult<Option<PendingOperation>> {
        Ok(self
            .tables
            .lock()
            .await
            .pending
            .values()
            .find(|p| p.token == token)
            .cloned())
    }

    async fn delete_pending(&self, id: Uuid) -> StoreResult<()> {
        match self.tables.lock().await.pending.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }

    async fn count_for_user_and_class(&self, email: &str, class_id: Uuid) -> StoreResult<i64> {
        let now = Utc::now();
        let tables = self.tables.lock().await;
        Ok(tables
            .pending
            .values()
            .filter(|p| p.email == email && p.class_id == class_id && !p.is_expired(now))
            .count() as i64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.pending.len();
        tables.pending.retain(|_, p| !p.is_expired(now));
        Ok((before - tables.pending.len()) as u64)
    }
}

#[async_trait]
impl PassRepository for MemoryStore {
    async fn insert_pass(&self, pass: &Pass) -> StoreResult<()> {
        self.tables.lock().await.passes.insert(pass.id, pass.clone());
        Ok(())
    }

    async fn get_pass(&self, id: Uuid) -> StoreResult<Option<Pass>> {
        Ok(self.tables.lock().await.passes.get(&id).cloned())
    }

    async fn get_active_for_email(&self, email: &str) -> StoreResult<Option<Pass>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .passes
            .values()
            .filter(|p| p.email == email && p.is_active)
            .min_by_key(|p| (!p.has_credit(), p.created_at))
            .cloned())
    }

    async fn save_activation(&self, pass: &Pass) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.passes.get_mut(&pass.id) {
            Some(stored) if !stored.is_active => {
                stored.used_credits = pass.used_credits;
                stored.used_booking_ids = pass.used_booking_ids.clone();
                stored.is_active = true;
                stored.activated_at = pass.activated_at;
                Ok(())
            }
            _ => Err(StoreError::NoRowsAffected),
        }
    }
}

#[async_trait]
impl BookingLedger for MemoryStore {
    async fn commit_confirmation(
        &self,
        pending: &PendingOperation,
        booking: &Booking,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;

        // Validate everything before the first write.
        if !tables.pending.contains_key(&pending.id) {
            return Err(StoreError::NotFound);
        }
        match tables.classes.get(&booking.class_id) {
            Some(class) if class.current_capacity > 0 => {}
            _ => return Err(StoreError::NoRowsAffected),
        }
        if tables.booking_exists(booking.class_id, &booking.email) {
            return Err(StoreError::UniqueViolation("bookings_class_email_key".to_string()));
        }

        tables.pending.remove(&pending.id);
        tables.decrement(booking.class_id)?;
        tables.insert_booking(booking)?;
        if let Some(pass) = tables.pass_with_credit(&booking.email) {
            pass.used_credits += 1;
            pass.used_booking_ids.push(booking.id);
        }
        Ok(())
    }

    async fn commit_cancellation(
        &self,
        target: &CancellationTarget,
        pending_id: Option<Uuid>,
    ) -> StoreResult<Booking> {
        let mut tables = self.tables.lock().await;

        if let Some(id) = pending_id {
            if !tables.pending.contains_key(&id) {
                return Err(StoreError::NotFound);
            }
        }
        let booking_id = tables
            .bookings
            .values()
            .find(|b| match target {
                CancellationTarget::ClassAndEmail { class_id, email } => {
                    b.class_id == *class_id && b.email == *email
                }
                CancellationTarget::BookingToken { booking_id, token } => {
                    b.id == *booking_id && b.confirmation_token == *token
                }
            })
            .map(|b| b.id)
            .ok_or(StoreError::NoRowsAffected)?;

        if let Some(id) = pending_id {
            tables.pending.remove(&id);
        }
        let booking = tables
            .bookings
            .remove(&booking_id)
            .ok_or(StoreError::NoRowsAffected)?;
        tables.release(&booking);
        Ok(booking)
    }

    async fn commit_removal(&self, booking_id: Uuid) -> StoreResult<Booking> {
        let mut tables = self.tables.lock().await;
        let booking = tables
            .bookings
            .remove(&booking_id)
            .ok_or(StoreError::NoRowsAffected)?;
        tables.release(&booking);
        Ok(booking)
    }
}

/// A notification the [`RecordingNotifier`] accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotification {
    ConfirmationLink {
        email: String,
        kind: OperationKind,
        link: String,
    },
    BookingConfirmed {
        email: String,
        booking_id: Uuid,
        cancellation_link: String,
    },
    BookingCancelled {
        email: String,
        booking_id: Uuid,
    },
    OwnerCancellationNotice {
        owner_email: String,
        booking_id: Uuid,
        attendee: String,
    },
    PassActivated {
        email: String,
        pass_id: Uuid,
    },
}

/// Notification double that records instead of sending. It can be switched
/// to fail or to stall for a while before answering.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<StdMutex<Vec<SentNotification>>>,
    failing: Arc<AtomicBool>,
    delay: Arc<StdMutex<Option<Duration>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        lock(&self.sent).clone()
    }

    /// Links sent for pending operations of `kind`, oldest first.
    pub fn links(&self, kind: OperationKind) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter_map(|n| match n {
                SentNotification::ConfirmationLink { kind: k, link, .. } if *k == kind => {
                    Some(link.clone())
                }
                _ => None,
            })
            .collect()
    }

    async fn record(&self, notification: SentNotification) -> Result<(), NotificationError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("recording notifier set to fail".to_string()));
        }
        lock(&self.sent).push(notification);
        Ok(())
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn send_confirmation_link(
        &self,
        email: &str,
        _first_name: &str,
        kind: OperationKind,
        link: &str,
    ) -> Result<(), NotificationError> {
        self.record(SentNotification::ConfirmationLink {
            email: email.to_string(),
            kind,
            link: link.to_string(),
        })
        .await
    }

    async fn send_booking_confirmed(
        &self,
        details: &BookingDetails,
        cancellation_link: &str,
    ) -> Result<(), NotificationError> {
        self.record(SentNotification::BookingConfirmed {
            email: details.email.clone(),
            booking_id: details.booking_id,
            cancellation_link: cancellation_link.to_string(),
        })
        .await
    }

    async fn send_booking_cancelled(&self, details: &BookingDetails) -> Result<(), NotificationError> {
        self.record(SentNotification::BookingCancelled {
            email: details.email.clone(),
            booking_id: details.booking_id,
        })
        .await
    }

    async fn send_owner_cancellation_notice(
        &self,
        owner_email: &str,
        details: &BookingDetails,
    ) -> Result<(), NotificationError> {
        self.record(SentNotification::OwnerCancellationNotice {
            owner_email: owner_email.to_string(),
            booking_id: details.booking_id,
            attendee: details.attendee_name(),
        })
        .await
    }

    async fn send_pass_activated(&self, pass: &Pass) -> Result<(), NotificationError> {
        self.record(SentNotification::PassActivated {
            email: pass.email.clone(),
            pass_id: pass.id,
        })
        .await
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook_core::repository::{BookingLedger, BookingRepository};
use classbook_core::{Booking, CancellationTarget, PendingOperation, StoreError, StoreResult};
use classbook_shared::Masked;
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::class_repo::{decrement_capacity_on, increment_capacity_on};
use crate::database::{store_error, PgStore};
use crate::pass_repo;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookingRow {
    id: Uuid,
    class_id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    confirmation_token: String,
    created_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            class_id: row.class_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            confirmation_token: row.confirmation_token,
            created_at: row.created_at,
        }
    }
}

const BOOKING_COLUMNS: &str =
    "id, class_id, email, first_name, last_name, confirmation_token, created_at";

async fn insert_booking_on(conn: &mut PgConnection, booking: &Booking) -> StoreResult<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO bookings (id, class_id, email, first_name, last_name, confirmation_token, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind(booking.id)
    .bind(booking.class_id)
    .bind(&booking.email)
    .bind(&booking.first_name)
    .bind(&booking.last_name)
    .bind(&booking.confirmation_token)
    .bind(booking.created_at)
    .fetch_one(conn)
    .await
    .map_err(store_error)?;

    Ok(id)
}

/// Deletes the pending row inside the transaction. Zero rows means a
/// concurrent resolve already spent the token.
async fn consume_pending(tx: &mut Transaction<'_, Postgres>, pending_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM pending_operations WHERE id = $1")
        .bind(pending_id)
        .execute(&mut **tx)
        .await
        .map_err(store_error)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Seat and pass credit go back together with the deleted booking row.
async fn release_booking(tx: &mut Transaction<'_, Postgres>, booking: &Booking) -> StoreResult<()> {
    match increment_capacity_on(&mut **tx, booking.class_id).await {
        Ok(()) => {}
        Err(StoreError::NoRowsAffected) => {
            warn!(
                "Class {} already at max capacity while releasing booking {}",
                booking.class_id, booking.id
            );
        }
        Err(e) => return Err(e),
    }
    pass_repo::release_credit_on(&mut **tx, booking.id).await
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(row.map(Booking::from))
    }

    async fn get_by_email_and_class(
        &self,
        class_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE class_id = $1 AND email = $2",
            BOOKING_COLUMNS
        ))
        .bind(class_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(Booking::from))
    }

    async fn count_for_class(&self, class_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE class_id = $1")
            .bind(class_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)
    }

    async fn insert_booking(&self, booking: &Booking) -> StoreResult<Uuid> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        insert_booking_on(&mut conn, booking).await
    }

    async fn delete_booking(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NoRowsAffected);
        }
        Ok(())
    }

    async fn list_for_class(&self, class_id: Uuid) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE class_id = $1 ORDER BY created_at",
            BOOKING_COLUMNS
        ))
        .bind(class_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(Booking::from).collect())
    }

    async fn list_for_email(&self, email: &str) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE email = $1 ORDER BY created_at",
            BOOKING_COLUMNS
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(Booking::from).collect())
    }
}

#[async_trait]
impl BookingLedger for PgStore {
    async fn commit_confirmation(
        &self,
        pending: &PendingOperation,
        booking: &Booking,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        consume_pending(&mut tx, pending.id).await?;
        decrement_capacity_on(&mut *tx, booking.class_id).await?;
        insert_booking_on(&mut tx, booking).await?;

        if !pass_repo::consume_credit_on(&mut *tx, &booking.email, booking.id).await? {
            debug!("No pass credit for {}", Masked(booking.email.as_str()));
        }

        tx.commit().await.map_err(store_error)?;
        Ok(())
    }

    async fn commit_cancellation(
        &self,
        target: &CancellationTarget,
        pending_id: Option<Uuid>,
    ) -> StoreResult<Booking> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        if let Some(id) = pending_id {
            consume_pending(&mut tx, id).await?;
        }

        let row: Option<BookingRow> = match target {
            CancellationTarget::ClassAndEmail { class_id, email } => {
                sqlx::query_as(&format!(
                    "DELETE FROM bookings WHERE class_id = $1 AND email = $2 RETURNING {}",
                    BOOKING_COLUMNS
                ))
                .bind(class_id)
                .bind(email)
                .fetch_optional(&mut *tx)
                .await
            }
            CancellationTarget::BookingToken { booking_id, token } => {
                sqlx::query_as(&format!(
                    "DELETE FROM bookings WHERE id = $1 AND confirmation_token = $2 RETURNING {}",
                    BOOKING_COLUMNS
                ))
                .bind(booking_id)
                .bind(token)
                .fetch_optional(&mut *tx)
                .await
            }
        }
        .map_err(store_error)?;

        let booking = row.map(Booking::from).ok_or(StoreError::NoRowsAffected)?;
        release_booking(&mut tx, &booking).await?;

        tx.commit().await.map_err(store_error)?;
        Ok(booking)
    }

    async fn commit_removal(&self, booking_id: Uuid) -> StoreResult<Booking> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "DELETE FROM bookings WHERE id = $1 RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;

        let booking = row.map(Booking::from).ok_or(StoreError::NoRowsAffected)?;
        release_booking(&mut tx, &booking).await?;

        tx.commit().await.map_err(store_error)?;
        Ok(booking)
    }
}

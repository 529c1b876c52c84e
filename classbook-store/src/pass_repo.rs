use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook_core::repository::PassRepository;
use classbook_core::{Pass, StoreError, StoreResult};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::database::{store_error, PgStore};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PassRow {
    id: Uuid,
    email: String,
    total_credits: i32,
    used_credits: i32,
    used_booking_ids: Vec<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
}

impl From<PassRow> for Pass {
    fn from(row: PassRow) -> Self {
        Pass {
            id: row.id,
            email: row.email,
            total_credits: row.total_credits,
            used_credits: row.used_credits,
            used_booking_ids: row.used_booking_ids,
            is_active: row.is_active,
            created_at: row.created_at,
            activated_at: row.activated_at,
        }
    }
}

const PASS_COLUMNS: &str =
    "id, email, total_credits, used_credits, used_booking_ids, is_active, created_at, activated_at";

/// Spends one credit of the oldest active pass that still has one.
/// Returns whether a credit was taken.
pub(crate) async fn consume_credit_on<'e, E>(executor: E, email: &str, booking_id: Uuid) -> StoreResult<bool>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE passes SET used_credits = used_credits + 1, \
             used_booking_ids = array_append(used_booking_ids, $2) \
         WHERE id = ( \
             SELECT id FROM passes \
             WHERE email = $1 AND is_active AND used_credits < total_credits \
             ORDER BY created_at LIMIT 1 FOR UPDATE \
         ) AND used_credits < total_credits",
    )
    .bind(email)
    .bind(booking_id)
    .execute(executor)
    .await
    .map_err(store_error)?;

    Ok(result.rows_affected() > 0)
}

/// Gives back the credit a booking held, if any.
pub(crate) async fn release_credit_on<'e, E>(executor: E, booking_id: Uuid) -> StoreResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "UPDATE passes SET used_credits = used_credits - 1, \
             used_booking_ids = array_remove(used_booking_ids, $1) \
         WHERE $1 = ANY(used_booking_ids)",
    )
    .bind(booking_id)
    .execute(executor)
    .await
    .map_err(store_error)?;

    Ok(())
}

#[async_trait]
impl PassRepository for PgStore {
    async fn insert_pass(&self, pass: &Pass) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO passes ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            PASS_COLUMNS
        ))
        .bind(pass.id)
        .bind(&pass.email)
        .bind(pass.total_credits)
        .bind(pass.used_credits)
        .bind(&pass.used_booking_ids)
        .bind(pass.is_active)
        .bind(pass.created_at)
        .bind(pass.activated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn get_pass(&self, id: Uuid) -> StoreResult<Option<Pass>> {
        let row: Option<PassRow> =
            sqlx::query_as(&format!("SELECT {} FROM passes WHERE id = $1", PASS_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(row.map(Pass::from))
    }

    async fn get_active_for_email(&self, email: &str) -> StoreResult<Option<Pass>> {
        // Prefer the pass the next booking would draw from.
        let row: Option<PassRow> = sqlx::query_as(&format!(
            "SELECT {} FROM passes WHERE email = $1 AND is_active \
             ORDER BY (used_credits < total_credits) DESC, created_at LIMIT 1",
            PASS_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(Pass::from))
    }

    async fn save_activation(&self, pass: &Pass) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE passes SET used_credits = $2, used_booking_ids = $3, is_active = TRUE, activated_at = $4 \
             WHERE id = $1 AND NOT is_active",
        )
        .bind(pass.id)
        .bind(pass.used_credits)
        .bind(&pass.used_booking_ids)
        .bind(pass.activated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NoRowsAffected);
        }
        Ok(())
    }
}

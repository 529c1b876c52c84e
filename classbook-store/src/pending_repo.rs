use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook_core::repository::PendingOperationRepository;
use classbook_core::{PendingOperation, StoreError, StoreResult};
use uuid::Uuid;

use crate::database::{store_error, PgStore};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PendingRow {
    id: Uuid,
    class_id: Uuid,
    kind: String,
    email: String,
    first_name: String,
    last_name: String,
    token: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<PendingRow> for PendingOperation {
    type Error = StoreError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse().map_err(|e: String| StoreError::Backend(e.into()))?;
        Ok(PendingOperation {
            id: row.id,
            class_id: row.class_id,
            kind,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            token: row.token,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[async_trait]
impl PendingOperationRepository for PgStore {
    async fn insert_pending(&self, op: &PendingOperation) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO pending_operations \
             (id, class_id, kind, email, first_name, last_name, token, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(op.id)
        .bind(op.class_id)
        .bind(op.kind.as_str())
        .bind(&op.email)
        .bind(&op.first_name)
        .bind(&op.last_name)
        .bind(&op.token)
        .bind(op.created_at)
        .bind(op.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn get_by_token(&self, token: &str) -> StoreResult<Option<PendingOperation>> {
        let row: Option<PendingRow> = sqlx::query_as(
            "SELECT id, class_id, kind, email, first_name, last_name, token, created_at, expires_at \
             FROM pending_operations WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(PendingOperation::try_from).transpose()
    }

    async fn delete_pending(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn count_for_user_and_class(&self, email: &str, class_id: Uuid) -> StoreResult<i64> {
        // Expired rows awaiting purge do not hold a slot.
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM pending_operations \
             WHERE email = $1 AND class_id = $2 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(email)
        .bind(class_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM pending_operations WHERE expires_at IS NOT NULL AND expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected())
    }
}

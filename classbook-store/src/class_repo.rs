use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook_core::repository::ClassRepository;
use classbook_core::{Class, NewClass, StoreError, StoreResult};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::database::{store_error, PgStore};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ClassRow {
    id: Uuid,
    name: String,
    level: String,
    location: String,
    starts_at: DateTime<Utc>,
    max_capacity: i32,
    current_capacity: i32,
    created_at: DateTime<Utc>,
}

impl From<ClassRow> for Class {
    fn from(row: ClassRow) -> Self {
        Class {
            id: row.id,
            name: row.name,
            level: row.level,
            location: row.location,
            starts_at: row.starts_at,
            max_capacity: row.max_capacity,
            current_capacity: row.current_capacity,
            created_at: row.created_at,
        }
    }
}

const CLASS_COLUMNS: &str =
    "id, name, level, location, starts_at, max_capacity, current_capacity, created_at";

/// Takes one seat. Guard and write are one statement, so concurrent callers
/// are serialized by the row lock and only one can take the last seat.
pub async fn decrement_capacity_on<'e, E>(executor: E, class_id: Uuid) -> StoreResult<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE classes SET current_capacity = current_capacity - 1 \
         WHERE id = $1 AND current_capacity > 0",
    )
    .bind(class_id)
    .execute(executor)
    .await
    .map_err(store_error)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NoRowsAffected);
    }
    Ok(())
}

pub async fn increment_capacity_on<'e, E>(executor: E, class_id: Uuid) -> StoreResult<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE classes SET current_capacity = current_capacity + 1 \
         WHERE id = $1 AND current_capacity < max_capacity",
    )
    .bind(class_id)
    .execute(executor)
    .await
    .map_err(store_error)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NoRowsAffected);
    }
    Ok(())
}

#[async_trait]
impl ClassRepository for PgStore {
    async fn get_class(&self, id: Uuid) -> StoreResult<Option<Class>> {
        let row: Option<ClassRow> =
            sqlx::query_as(&format!("SELECT {} FROM classes WHERE id = $1", CLASS_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(row.map(Class::from))
    }

    async fn insert_many(&self, classes: &[NewClass]) -> StoreResult<Vec<Class>> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut inserted = Vec::with_capacity(classes.len());
        let now = Utc::now();

        for new_class in classes {
            let class = new_class.clone().into_class(now);
            let row: ClassRow = sqlx::query_as(&format!(
                "INSERT INTO classes ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
                CLASS_COLUMNS, CLASS_COLUMNS
            ))
            .bind(class.id)
            .bind(&class.name)
            .bind(&class.level)
            .bind(&class.location)
            .bind(class.starts_at)
            .bind(class.max_capacity)
            .bind(class.current_capacity)
            .bind(class.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_error)?;

            inserted.push(Class::from(row));
        }

        tx.commit().await.map_err(store_error)?;
        Ok(inserted)
    }

    async fn decrement_capacity(&self, id: Uuid) -> StoreResult<()> {
        decrement_capacity_on(&self.pool, id).await
    }

    async fn increment_capacity(&self, id: Uuid) -> StoreResult<()> {
        increment_capacity_on(&self.pool, id).await
    }

    async fn list_upcoming(&self, now: DateTime<Utc>) -> StoreResult<Vec<Class>> {
        let rows: Vec<ClassRow> = sqlx::query_as(&format!(
            "SELECT {} FROM classes WHERE starts_at >= $1 ORDER BY starts_at",
            CLASS_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(Class::from).collect())
    }

    async fn delete_class(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM classes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NoRowsAffected);
        }
        Ok(())
    }
}

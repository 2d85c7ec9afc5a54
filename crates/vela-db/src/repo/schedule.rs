//! Schedule repository.

use async_trait::async_trait;
use sqlx::PgPool;
use vela_core::Schedule;

use crate::{DbError, DbResult};

/// Database row for schedules.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleRow {
    pub id: i64,
    pub repo_id: i64,
    pub active: bool,
    pub name: String,
    pub entry: String,
    pub branch: String,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
    pub scheduled_at: i64,
    pub error: String,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: row.id,
            repo_id: row.repo_id,
            active: row.active,
            name: row.name,
            entry: row.entry,
            branch: row.branch,
            created_at: row.created_at,
            created_by: row.created_by,
            updated_at: row.updated_at,
            updated_by: row.updated_by,
            scheduled_at: row.scheduled_at,
            error: row.error,
        }
    }
}

#[async_trait]
pub trait ScheduleRepo: Send + Sync {
    /// Create a schedule. Names are unique per repository.
    async fn create(&self, schedule: &Schedule) -> DbResult<Schedule>;

    async fn get_by_id(&self, id: i64) -> DbResult<Schedule>;

    /// Every schedule with `active = true`.
    async fn list_active(&self) -> DbResult<Vec<Schedule>>;

    async fn list_by_repo(&self, repo_id: i64) -> DbResult<Vec<Schedule>>;

    /// Advance the trigger marker, but only if it still holds `expected`.
    ///
    /// Touches `scheduled_at` alone. Returns `false` when another writer
    /// moved the marker first.
    async fn mark_scheduled(&self, id: i64, expected: i64, scheduled_at: i64) -> DbResult<bool>;

    /// Record (or clear, with an empty string) the last failure. Leaves
    /// `scheduled_at` untouched.
    async fn update_error(&self, id: i64, error: &str, updated_at: i64) -> DbResult<()>;
}

/// PostgreSQL implementation of ScheduleRepo.
pub struct PgScheduleRepo {
    pool: PgPool,
}

impl PgScheduleRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepo for PgScheduleRepo {
    async fn create(&self, schedule: &Schedule) -> DbResult<Schedule> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            r#"
            INSERT INTO schedules (repo_id, active, name, entry, branch, created_at, created_by,
                                   updated_at, updated_by, scheduled_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(schedule.repo_id)
        .bind(schedule.active)
        .bind(&schedule.name)
        .bind(&schedule.entry)
        .bind(&schedule.branch)
        .bind(schedule.created_at)
        .bind(&schedule.created_by)
        .bind(schedule.updated_at)
        .bind(&schedule.updated_by)
        .bind(schedule.scheduled_at)
        .bind(&schedule.error)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, format!("schedule {}", schedule.name)))?;
        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64) -> DbResult<Schedule> {
        let row = sqlx::query_as::<_, ScheduleRow>("SELECT * FROM schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        Ok(row.into())
    }

    async fn list_active(&self) -> DbResult<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM schedules WHERE active = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Schedule::from).collect())
    }

    async fn list_by_repo(&self, repo_id: i64) -> DbResult<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM schedules WHERE repo_id = $1 ORDER BY name",
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Schedule::from).collect())
    }

    async fn mark_scheduled(&self, id: i64, expected: i64, scheduled_at: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET scheduled_at = $3 WHERE id = $1 AND scheduled_at = $2",
        )
        .bind(id)
        .bind(expected)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_error(&self, id: i64, error: &str, updated_at: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE schedules SET error = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(error)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("schedule {}", id)));
        }
        Ok(())
    }
}

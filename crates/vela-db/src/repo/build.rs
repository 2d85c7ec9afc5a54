//! Build repository.

use async_trait::async_trait;
use sqlx::PgPool;
use vela_core::{Build, BuildStatus};

use crate::{DbError, DbResult};

/// Database row for builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildRow {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub event: String,
    pub status: String,
    pub error: String,
    pub author: String,
    pub sender: String,
    pub sender_scm_id: String,
    pub branch: String,
    #[sqlx(rename = "ref")]
    pub r#ref: String,
    pub message: String,
    pub clone: String,
    pub route: String,
    pub enqueued: i64,
    pub created: i64,
    pub finished: i64,
}

impl TryFrom<BuildRow> for Build {
    type Error = DbError;

    fn try_from(row: BuildRow) -> Result<Self, Self::Error> {
        Ok(Build {
            id: row.id,
            repo_id: row.repo_id,
            number: row.number,
            event: row.event.parse().map_err(DbError::InvalidData)?,
            status: row.status.parse().map_err(DbError::InvalidData)?,
            error: row.error,
            author: row.author,
            sender: row.sender,
            sender_scm_id: row.sender_scm_id,
            branch: row.branch,
            r#ref: row.r#ref,
            message: row.message,
            clone: row.clone,
            route: row.route,
            enqueued: row.enqueued,
            created: row.created,
        })
    }
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Persist a new build with the next number for its repository.
    async fn create(&self, build: &Build) -> DbResult<Build>;

    /// Stamp the time a build was pushed onto the queue.
    async fn update_enqueued(&self, id: i64, enqueued: i64) -> DbResult<()>;

    /// Fail every `pending approval` build that has waited longer than its
    /// repository's approval timeout. Returns how many were swept.
    async fn clean_pending_approval(&self, message: &str, now: i64) -> DbResult<u64>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create(&self, build: &Build) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (repo_id, number, event, status, error, author, sender,
                                sender_scm_id, branch, ref, message, clone, route, enqueued, created)
            VALUES ($1, (SELECT COALESCE(MAX(number), 0) + 1 FROM builds WHERE repo_id = $1),
                    $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(build.repo_id)
        .bind(build.event.to_string())
        .bind(build.status.to_string())
        .bind(&build.error)
        .bind(&build.author)
        .bind(&build.sender)
        .bind(&build.sender_scm_id)
        .bind(&build.branch)
        .bind(&build.r#ref)
        .bind(&build.message)
        .bind(&build.clone)
        .bind(&build.route)
        .bind(build.enqueued)
        .bind(build.created)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, format!("build for repo {}", build.repo_id)))?;
        row.try_into()
    }

    async fn update_enqueued(&self, id: i64, enqueued: i64) -> DbResult<()> {
        sqlx::query("UPDATE builds SET enqueued = $2 WHERE id = $1")
            .bind(id)
            .bind(enqueued)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clean_pending_approval(&self, message: &str, now: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE builds SET status = $1, error = $2, finished = $3
            FROM repos
            WHERE builds.repo_id = repos.id
              AND builds.status = $4
              AND builds.created < $3 - (repos.approval_timeout::BIGINT * 86400)
            "#,
        )
        .bind(BuildStatus::Error.to_string())
        .bind(message)
        .bind(now)
        .bind(BuildStatus::PendingApproval.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::Event;

    fn row(status: &str) -> BuildRow {
        BuildRow {
            id: 1,
            repo_id: 7,
            number: 3,
            event: "schedule".to_string(),
            status: status.to_string(),
            error: String::new(),
            author: "octocat".to_string(),
            sender: "octocat".to_string(),
            sender_scm_id: "5150".to_string(),
            branch: "main".to_string(),
            r#ref: "refs/heads/main".to_string(),
            message: String::new(),
            clone: "https://github.com/octocat/hello.git".to_string(),
            route: "vela".to_string(),
            enqueued: 0,
            created: 0,
            finished: 0,
        }
    }

    #[test]
    fn test_row_into_build() {
        let build = Build::try_from(row("pending approval")).unwrap();
        assert_eq!(build.event, Event::Schedule);
        assert_eq!(build.status, BuildStatus::PendingApproval);
        assert_eq!(build.r#ref, "refs/heads/main");
    }

    #[test]
    fn test_unknown_status_is_invalid_data() {
        assert!(matches!(
            Build::try_from(row("paused")),
            Err(DbError::InvalidData(_))
        ));
    }
}

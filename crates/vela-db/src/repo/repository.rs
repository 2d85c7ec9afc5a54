//! Repository repository (for enabled source repositories).

use async_trait::async_trait;
use sqlx::PgPool;
use vela_core::Repo;

use crate::{DbError, DbResult};

/// Database row for repos.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepoRow {
    pub id: i64,
    pub owner_id: i64,
    pub org: String,
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    pub active: bool,
    pub approval_timeout: i32,
}

impl From<RepoRow> for Repo {
    fn from(row: RepoRow) -> Self {
        Repo {
            id: row.id,
            owner_id: row.owner_id,
            org: row.org,
            name: row.name,
            full_name: row.full_name,
            clone_url: row.clone_url,
            default_branch: row.default_branch,
            active: row.active,
            approval_timeout: row.approval_timeout,
        }
    }
}

#[async_trait]
pub trait RepoRepo: Send + Sync {
    /// Get a repository by ID.
    async fn get_by_id(&self, id: i64) -> DbResult<Repo>;
}

/// PostgreSQL implementation.
pub struct PgRepoRepo {
    pool: PgPool,
}

impl PgRepoRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoRepo for PgRepoRepo {
    async fn get_by_id(&self, id: i64) -> DbResult<Repo> {
        let row = sqlx::query_as::<_, RepoRow>("SELECT * FROM repos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("repo {}", id)))?;
        Ok(row.into())
    }
}

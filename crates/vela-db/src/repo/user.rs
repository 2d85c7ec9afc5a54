//! User repository.

use async_trait::async_trait;
use sqlx::PgPool;
use vela_core::User;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub token: String,
    pub active: bool,
    pub admin: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            token: row.token,
            active: row.active,
            admin: row.admin,
        }
    }
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DbResult<User>;
}

/// PostgreSQL implementation of UserRepo.
pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn get_by_id(&self, id: i64) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))?;
        Ok(row.into())
    }
}

//! Database layer for the Vela control plane.
//!
//! Provides repository traits and PostgreSQL implementations.

pub mod error;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// Every resource repository the control plane uses.
#[derive(Clone)]
pub struct Database {
    pub schedules: Arc<dyn ScheduleRepo>,
    pub repos: Arc<dyn RepoRepo>,
    pub users: Arc<dyn UserRepo>,
    pub settings: Arc<dyn SettingsRepo>,
    pub builds: Arc<dyn BuildRepo>,
}

impl Database {
    /// PostgreSQL-backed repositories sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            schedules: Arc::new(PgScheduleRepo::new(pool.clone())),
            repos: Arc::new(PgRepoRepo::new(pool.clone())),
            users: Arc::new(PgUserRepo::new(pool.clone())),
            settings: Arc::new(PgSettingsRepo::new(pool.clone())),
            builds: Arc::new(PgBuildRepo::new(pool)),
        }
    }
}

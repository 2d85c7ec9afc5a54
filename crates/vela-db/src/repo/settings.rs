//! Platform settings repository.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use vela_core::{Platform, SETTINGS_ID};

use crate::{DbError, DbResult};

/// Database row for the settings singleton.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingsRow {
    pub id: i64,
    pub compiler: serde_json::Value,
    pub queue: serde_json::Value,
    pub scm: serde_json::Value,
    pub repo_allowlist: serde_json::Value,
    pub schedule_allowlist: serde_json::Value,
    pub max_dashboard_repos: i32,
    pub queue_restart_limit: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub updated_by: String,
}

fn decode<T: DeserializeOwned>(column: &str, value: serde_json::Value) -> DbResult<T> {
    serde_json::from_value(value)
        .map_err(|e| DbError::InvalidData(format!("settings.{}: {}", column, e)))
}

fn encode<T: serde::Serialize>(column: &str, value: &T) -> DbResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| DbError::InvalidData(format!("settings.{}: {}", column, e)))
}

impl TryFrom<SettingsRow> for Platform {
    type Error = DbError;

    fn try_from(row: SettingsRow) -> Result<Self, Self::Error> {
        Ok(Platform {
            id: row.id,
            compiler: decode("compiler", row.compiler)?,
            queue: decode("queue", row.queue)?,
            scm: decode("scm", row.scm)?,
            repo_allowlist: decode("repo_allowlist", row.repo_allowlist)?,
            schedule_allowlist: decode("schedule_allowlist", row.schedule_allowlist)?,
            max_dashboard_repos: row.max_dashboard_repos,
            queue_restart_limit: row.queue_restart_limit,
            created_at: row.created_at,
            updated_at: row.updated_at,
            updated_by: row.updated_by,
        })
    }
}

#[async_trait]
pub trait SettingsRepo: Send + Sync {
    /// The settings row, or [`DbError::NotFound`] before first boot.
    async fn get(&self) -> DbResult<Platform>;

    /// Insert the settings row if none exists and return whichever row won.
    async fn create(&self, settings: &Platform) -> DbResult<Platform>;
}

/// PostgreSQL implementation of SettingsRepo.
pub struct PgSettingsRepo {
    pool: PgPool,
}

impl PgSettingsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepo for PgSettingsRepo {
    async fn get(&self) -> DbResult<Platform> {
        let row = sqlx::query_as::<_, SettingsRow>("SELECT * FROM settings WHERE id = $1")
            .bind(SETTINGS_ID)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound("platform settings".to_string()))?;
        row.try_into()
    }

    async fn create(&self, settings: &Platform) -> DbResult<Platform> {
        // Replicas booting together may both get here; the loser's insert is
        // a no-op and it reads back the winner's row.
        sqlx::query(
            r#"
            INSERT INTO settings (id, compiler, queue, scm, repo_allowlist, schedule_allowlist,
                                  max_dashboard_repos, queue_restart_limit, created_at,
                                  updated_at, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(SETTINGS_ID)
        .bind(encode("compiler", &settings.compiler)?)
        .bind(encode("queue", &settings.queue)?)
        .bind(encode("scm", &settings.scm)?)
        .bind(encode("repo_allowlist", &settings.repo_allowlist)?)
        .bind(encode("schedule_allowlist", &settings.schedule_allowlist)?)
        .bind(settings.max_dashboard_repos)
        .bind(settings.queue_restart_limit)
        .bind(settings.created_at)
        .bind(settings.updated_at)
        .bind(&settings.updated_by)
        .execute(&self.pool)
        .await?;

        self.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> SettingsRow {
        SettingsRow {
            id: SETTINGS_ID,
            compiler: json!({
                "clone_image": "target/vela-git-slim:latest",
                "template_depth": 3,
                "starlark_exec_limit": 7500
            }),
            queue: json!({ "routes": ["vela"] }),
            scm: json!({ "repo_role_map": {}, "org_role_map": {}, "team_role_map": {} }),
            repo_allowlist: json!(["*"]),
            schedule_allowlist: json!(["octocat/*"]),
            max_dashboard_repos: 10,
            queue_restart_limit: 30,
            created_at: 1,
            updated_at: 2,
            updated_by: "vela-server".to_string(),
        }
    }

    #[test]
    fn test_row_into_platform() {
        let platform = Platform::try_from(row()).unwrap();
        assert_eq!(platform.compiler.template_depth, 3);
        assert_eq!(platform.queue.routes, vec!["vela".to_string()]);
        assert_eq!(platform.schedule_allowlist, vec!["octocat/*".to_string()]);
    }

    #[test]
    fn test_malformed_column_names_the_column() {
        let mut bad = row();
        bad.queue = json!({ "routes": "vela" });
        match Platform::try_from(bad) {
            Err(DbError::InvalidData(msg)) => assert!(msg.starts_with("settings.queue")),
            other => panic!("expected invalid data, got {:?}", other),
        }
    }
}

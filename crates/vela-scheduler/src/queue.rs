//! Build queue backed by PostgreSQL.
//!
//! Items are appended to `queue_items` per route; workers claim them from
//! there.

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;
use tracing::debug;
use vela_core::{Queue, QueueItem, QueueSettings, SharedSettings};

/// Queue writing items to the `queue_items` table.
pub struct PgQueue {
    pool: PgPool,
    defaults: QueueSettings,
    live: RwLock<Option<SharedSettings>>,
}

impl PgQueue {
    pub fn new(pool: PgPool, defaults: QueueSettings) -> Self {
        Self {
            pool,
            defaults,
            live: RwLock::new(None),
        }
    }

    fn routes(&self) -> Vec<String> {
        match self.live.read().as_ref() {
            Some(shared) => shared.load().queue.routes.clone(),
            None => self.defaults.routes.clone(),
        }
    }
}

/// Pick the route for a build from the configured routes.
///
/// A requested route must be configured; without one the first route is
/// used.
pub fn resolve_route(routes: &[String], requested: Option<&str>) -> vela_core::Result<String> {
    match requested.map(str::trim).filter(|r| !r.is_empty()) {
        Some(route) if routes.iter().any(|r| r == route) => Ok(route.to_string()),
        Some(route) => Err(vela_core::Error::Queue(format!(
            "route {} is not configured",
            route
        ))),
        None => routes
            .first()
            .cloned()
            .ok_or_else(|| vela_core::Error::Queue("no queue routes configured".to_string())),
    }
}

#[async_trait]
impl Queue for PgQueue {
    fn settings(&self) -> QueueSettings {
        self.defaults.clone()
    }

    fn set_settings(&self, settings: SharedSettings) {
        *self.live.write() = Some(settings);
    }

    fn route(&self, requested: Option<&str>) -> vela_core::Result<String> {
        resolve_route(&self.routes(), requested)
    }

    async fn push(&self, route: &str, item: &QueueItem) -> vela_core::Result<()> {
        let payload = serde_json::to_value(item)
            .map_err(|e| vela_core::Error::Queue(format!("unable to encode item: {}", e)))?;

        sqlx::query("INSERT INTO queue_items (route, payload, created_at) VALUES ($1, $2, NOW())")
            .bind(route)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| vela_core::Error::Queue(e.to_string()))?;

        debug!(route, build = item.build.id, "pushed item");
        Ok(())
    }
}

//! Platform settings bootstrap and refresh.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vela_core::{Clock, Compiler, Platform, Queue, SETTINGS_ID, ScmSettings, SharedSettings};
use vela_db::{DbError, SettingsRepo};

use crate::SchedulerError;
use crate::jitter::{jitter, sleep_or_cancel};

/// Identity recorded on settings the server creates itself.
pub const SETTINGS_AUTHOR: &str = "vela-server";

/// Values from server flags used when the settings row has to be created.
#[derive(Debug, Clone, Default)]
pub struct PlatformDefaults {
    pub repo_allowlist: Vec<String>,
    pub schedule_allowlist: Vec<String>,
    pub max_dashboard_repos: i32,
    pub queue_restart_limit: i32,
}

/// Load the platform settings, creating the row on first boot, and hand
/// the shared snapshot to the compiler and queue engines.
///
/// Sleeps a jittered `initial_delay` first so replicas starting together
/// do not all hit the store at once.
pub async fn bootstrap_settings(
    store: &dyn SettingsRepo,
    defaults: PlatformDefaults,
    compiler: &dyn Compiler,
    queue: &dyn Queue,
    clock: &dyn Clock,
    initial_delay: Duration,
) -> Result<SharedSettings, SchedulerError> {
    let delay = jitter(initial_delay, 2.0);
    info!(?delay, "retrieving initial platform settings");
    tokio::time::sleep(delay).await;

    let platform = match store.get().await {
        Ok(platform) => platform,
        Err(DbError::NotFound(_)) => {
            info!("creating initial platform settings");
            let now = clock.now().timestamp();
            let platform = Platform {
                id: SETTINGS_ID,
                compiler: compiler.settings(),
                queue: queue.settings(),
                scm: ScmSettings::default(),
                repo_allowlist: defaults.repo_allowlist,
                schedule_allowlist: defaults.schedule_allowlist,
                max_dashboard_repos: defaults.max_dashboard_repos,
                queue_restart_limit: defaults.queue_restart_limit,
                created_at: now,
                updated_at: now,
                updated_by: SETTINGS_AUTHOR.to_string(),
            };
            store.create(&platform).await?
        }
        Err(e) => return Err(e.into()),
    };

    let shared = SharedSettings::new(platform);
    compiler.set_settings(shared.clone());
    queue.set_settings(shared.clone());
    Ok(shared)
}

/// Periodically copies the stored settings into the shared snapshot.
pub struct SettingsRefresher {
    store: Arc<dyn SettingsRepo>,
    shared: SharedSettings,
    interval: Duration,
}

impl SettingsRefresher {
    pub fn new(store: Arc<dyn SettingsRepo>, shared: SharedSettings, interval: Duration) -> Self {
        Self {
            store,
            shared,
            interval,
        }
    }

    /// Refresh until cancelled. Read failures are logged and retried on the
    /// next interval.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "platform settings refresh interval set");

        while sleep_or_cancel(&cancel, self.interval).await {
            self.refresh().await;
        }

        info!("stopping platform settings refresher");
    }

    /// Re-read the settings once. Returns whether the snapshot was replaced.
    pub async fn refresh(&self) -> bool {
        match self.store.get().await {
            Ok(platform) => {
                debug!(updated_at = platform.updated_at, "refreshed platform settings");
                self.shared.store(platform);
                true
            }
            Err(e) => {
                warn!(error = %e, "unable to refresh platform settings");
                false
            }
        }
    }
}

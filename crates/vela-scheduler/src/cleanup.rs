//! Sweeps builds that waited too long for approval.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vela_core::Clock;
use vela_db::{BuildRepo, DbResult};

use crate::jitter::{jitter, sleep_or_cancel};

/// Error recorded on swept builds.
pub const APPROVAL_TIMEOUT_MESSAGE: &str = "build exceeded approval timeout";

pub struct CleanupLoop {
    builds: Arc<dyn BuildRepo>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl CleanupLoop {
    pub fn new(builds: Arc<dyn BuildRepo>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            builds,
            clock,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "starting pending approval cleanup");

        while sleep_or_cancel(&cancel, jitter(self.interval, 0.5)).await {
            match self.sweep().await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "cleaned up pending approval builds"),
                Err(e) => warn!(error = %e, "unable to clean up pending approval builds"),
            }
        }

        info!("stopping pending approval cleanup");
    }

    /// Fail every stale pending-approval build once.
    pub async fn sweep(&self) -> DbResult<u64> {
        self.builds
            .clean_pending_approval(APPROVAL_TIMEOUT_MESSAGE, self.clock.now().timestamp())
            .await
    }
}

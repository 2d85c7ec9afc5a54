//! Application state.

use std::sync::Arc;
use std::time::Duration;
use vela_core::{Clock, SharedSettings};
use vela_db::Database;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub settings: SharedSettings,
    pub clock: Arc<dyn Clock>,
    /// Smallest gap allowed between two boundaries of a new schedule.
    pub schedule_minimum_frequency: Duration,
}

impl AppState {
    pub fn new(
        db: Database,
        settings: SharedSettings,
        clock: Arc<dyn Clock>,
        schedule_minimum_frequency: Duration,
    ) -> Self {
        Self {
            db,
            settings,
            clock,
            schedule_minimum_frequency,
        }
    }
}

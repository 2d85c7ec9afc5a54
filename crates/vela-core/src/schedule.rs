//! Schedule types: named, cron-driven build triggers bound to a repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crontab::{CronEntry, CronError};

/// A recurring trigger for one repository and branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub repo_id: i64,
    pub active: bool,
    pub name: String,
    /// Five-field cron entry.
    pub entry: String,
    pub branch: String,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
    /// Unix timestamp of the last trigger attempt.
    pub scheduled_at: i64,
    /// Last failure message, empty on success.
    pub error: String,
}

impl Schedule {
    pub fn cron(&self) -> Result<CronEntry, CronError> {
        CronEntry::parse(&self.entry)
    }

    pub fn scheduled_at_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.scheduled_at, 0).unwrap_or_default()
    }

    /// The next boundary after `now`. Informational only; eligibility is
    /// decided from `scheduled_at`.
    pub fn next_run(&self, now: DateTime<Utc>) -> Option<i64> {
        self.cron()
            .and_then(|entry| entry.next_tick_after(now))
            .map(|t| t.timestamp())
            .ok()
    }
}

/// Request to create a schedule on a repository.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub entry: String,
    /// Defaults to the repository's default branch.
    pub branch: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// A schedule as returned by the API, with its derived next run.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub next_run: Option<i64>,
}

impl ScheduleView {
    pub fn new(schedule: Schedule, now: DateTime<Utc>) -> Self {
        let next_run = schedule.next_run(now);
        Self { schedule, next_run }
    }
}

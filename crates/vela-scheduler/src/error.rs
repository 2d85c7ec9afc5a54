//! Scheduler error types.

use thiserror::Error;
use vela_core::CronError;
use vela_db::DbError;

/// Why a schedule could not be triggered.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Cron(#[from] CronError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("skipping schedule: repo {repo} not on allowlist")]
    NotAllowlisted { repo: String },

    #[error("skipping schedule: repo {repo} is inactive")]
    RepoInactive { repo: String },

    #[error("unable to get SCM id for {user}: {source}")]
    Scm {
        user: String,
        #[source]
        source: vela_core::Error,
    },

    #[error("unable to compile and publish build: {0}")]
    Publish(#[source] vela_core::Error),
}

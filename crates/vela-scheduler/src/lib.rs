//! Background subsystems of the Vela control plane.
//!
//! Evaluates cron schedules without a distributed lock, hands triggered
//! builds to the compile-and-publish pipeline, keeps the shared platform
//! settings fresh and sweeps stale pending-approval builds. Every loop
//! sleeps against a cancellation token so the supervisor can stop it.

pub mod cleanup;
pub mod enqueue;
pub mod error;
pub mod jitter;
pub mod queue;
pub mod schedule;
pub mod settings;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use cleanup::CleanupLoop;
pub use enqueue::BuildEnqueuer;
pub use error::SchedulerError;
pub use queue::PgQueue;
pub use schedule::{ScheduleEvaluator, TickSummary};
pub use settings::{PlatformDefaults, SettingsRefresher, bootstrap_settings};

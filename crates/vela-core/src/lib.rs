//! Core domain types and traits for the Vela CI control plane.
//!
//! This crate contains:
//! - Schedules, repositories, users and builds
//! - Platform settings and the shared in-process snapshot
//! - Cron entry parsing and tick arithmetic
//! - Collaborator traits (compiler, queue, SCM, publisher)
//! - A clock abstraction so time can be faked in tests

pub mod build;
pub mod clock;
pub mod crontab;
pub mod engine;
pub mod error;
pub mod repo;
pub mod schedule;
pub mod settings;
pub mod user;

pub use build::{Build, BuildStatus, Event, ITEM_VERSION, QueueItem};
pub use clock::{Clock, FakeClock, SystemClock};
pub use crontab::{CronEntry, CronError};
pub use engine::{CompiledPipeline, Compiler, PublishRequest, Publisher, Queue, Scm};
pub use error::{Error, Result};
pub use repo::Repo;
pub use schedule::{CreateScheduleRequest, Schedule, ScheduleView};
pub use settings::{
    CompilerSettings, Platform, QueueSettings, SETTINGS_ID, ScmSettings, SharedSettings,
};
pub use user::User;

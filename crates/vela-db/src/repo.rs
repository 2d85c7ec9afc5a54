//! Repository traits and implementations.

pub mod build;
pub mod repository;
pub mod schedule;
pub mod settings;
pub mod user;

pub use build::{BuildRepo, PgBuildRepo};
pub use repository::{PgRepoRepo, RepoRepo};
pub use schedule::{PgScheduleRepo, ScheduleRepo};
pub use settings::{PgSettingsRepo, SettingsRepo};
pub use user::{PgUserRepo, UserRepo};

//! Build types and the queue item handed to workers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::engine::CompiledPipeline;
use crate::repo::Repo;

/// The event that caused a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    #[display("push")]
    Push,
    #[display("pull_request")]
    PullRequest,
    #[display("tag")]
    Tag,
    #[display("deployment")]
    Deployment,
    #[display("comment")]
    Comment,
    #[display("schedule")]
    Schedule,
}

impl std::str::FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Event::Push),
            "pull_request" => Ok(Event::PullRequest),
            "tag" => Ok(Event::Tag),
            "deployment" => Ok(Event::Deployment),
            "comment" => Ok(Event::Comment),
            "schedule" => Ok(Event::Schedule),
            _ => Err(format!("Unknown event: {}", s)),
        }
    }
}

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum BuildStatus {
    #[serde(rename = "pending")]
    #[display("pending")]
    Pending,
    #[serde(rename = "pending approval")]
    #[display("pending approval")]
    PendingApproval,
    #[serde(rename = "running")]
    #[display("running")]
    Running,
    #[serde(rename = "success")]
    #[display("success")]
    Success,
    #[serde(rename = "failure")]
    #[display("failure")]
    Failure,
    #[serde(rename = "error")]
    #[display("error")]
    Error,
    #[serde(rename = "killed")]
    #[display("killed")]
    Killed,
    #[serde(rename = "canceled")]
    #[display("canceled")]
    Canceled,
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "pending approval" => Ok(BuildStatus::PendingApproval),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failure" => Ok(BuildStatus::Failure),
            "error" => Ok(BuildStatus::Error),
            "killed" => Ok(BuildStatus::Killed),
            "canceled" => Ok(BuildStatus::Canceled),
            _ => Err(format!("Unknown build status: {}", s)),
        }
    }
}

/// A build of a repository.
///
/// `id` and `number` are zero until the build is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub event: Event,
    pub status: BuildStatus,
    pub error: String,
    pub author: String,
    pub sender: String,
    /// Numeric SCM identity of the sender.
    pub sender_scm_id: String,
    pub branch: String,
    pub r#ref: String,
    pub message: String,
    pub clone: String,
    /// Queue route the build is published on.
    pub route: String,
    pub enqueued: i64,
    pub created: i64,
}

impl Build {
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}

/// What a worker pops off the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub build: Build,
    pub repo: Repo,
    pub pipeline: CompiledPipeline,
    pub item_version: u64,
}

/// Version of the [`QueueItem`] layout workers must understand.
pub const ITEM_VERSION: u64 = 3;

//! Collaborator traits for the engines around the control plane.
//!
//! The scheduler only talks to the compiler, the queue and the SCM through
//! these seams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::{Build, QueueItem};
use crate::repo::Repo;
use crate::settings::{CompilerSettings, QueueSettings, SharedSettings};
use crate::Result;

/// An executable pipeline as produced by a [`Compiler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPipeline {
    pub version: String,
    pub clone_image: String,
    pub template_depth: i32,
    pub starlark_exec_limit: i64,
    /// Route requested by the pipeline's worker block, if any.
    pub worker_route: Option<String>,
}

/// Turns repository configuration into an executable pipeline.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// The defaults this engine was started with.
    fn settings(&self) -> CompilerSettings;

    /// Point the engine at the live platform settings.
    fn set_settings(&self, settings: SharedSettings);

    async fn compile(&self, repo: &Repo, build: &Build) -> Result<CompiledPipeline>;
}

/// A routed work queue.
#[async_trait]
pub trait Queue: Send + Sync {
    fn settings(&self) -> QueueSettings;

    fn set_settings(&self, settings: SharedSettings);

    /// Resolve the route a build should be published on.
    fn route(&self, requested: Option<&str>) -> Result<String>;

    async fn push(&self, route: &str, item: &QueueItem) -> Result<()>;
}

/// Source control provider.
#[async_trait]
pub trait Scm: Send + Sync {
    /// Resolve a username to the provider's numeric user id.
    async fn user_id(&self, username: &str, token: &str) -> Result<String>;
}

/// What the compile-and-publish step needs to know about a build.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub build: Build,
    pub repo: Repo,
    /// Which subsystem asked for the build (`"schedule"`, `"webhook"`, ...).
    pub source: String,
    pub retries: u32,
}

/// Compiles a build, persists it and prepares its queue item.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn compile_and_publish(&self, request: PublishRequest) -> Result<QueueItem>;
}

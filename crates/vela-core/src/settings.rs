//! Platform settings.
//!
//! The durable copy is a singleton row (`id = 1`). The in-process copy is a
//! [`SharedSettings`] handle held by the HTTP layer, the compiler, the queue
//! and the scheduler. The refresher publishes whole snapshots into it; every
//! reader gets an immutable `Arc<Platform>` and never sees a half-applied
//! update.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Id of the one settings row.
pub const SETTINGS_ID: i64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSettings {
    pub clone_image: String,
    pub template_depth: i32,
    pub starlark_exec_limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub routes: Vec<String>,
}

/// Maps SCM permission names onto platform roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmSettings {
    pub repo_role_map: HashMap<String, String>,
    pub org_role_map: HashMap<String, String>,
    pub team_role_map: HashMap<String, String>,
}

/// Process-wide platform configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: i64,
    pub compiler: CompilerSettings,
    pub queue: QueueSettings,
    pub scm: ScmSettings,
    pub repo_allowlist: Vec<String>,
    pub schedule_allowlist: Vec<String>,
    pub max_dashboard_repos: i32,
    pub queue_restart_limit: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub updated_by: String,
}

/// Cheap, cloneable handle to the current settings snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    current: Arc<RwLock<Arc<Platform>>>,
}

impl SharedSettings {
    pub fn new(settings: Platform) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// The snapshot in effect right now.
    pub fn load(&self) -> Arc<Platform> {
        self.current.read().clone()
    }

    /// Publish a new snapshot. Readers holding the old one keep it.
    pub fn store(&self, settings: Platform) {
        *self.current.write() = Arc::new(settings);
    }
}

//! Repository types.

use serde::{Deserialize, Serialize};

/// A repository enabled on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    /// User whose SCM token acts on behalf of the repository.
    pub owner_id: i64,
    pub org: String,
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    pub active: bool,
    /// Days a build may wait for approval before it is swept.
    pub approval_timeout: i32,
}

impl Repo {
    /// Whether the repository matches an allowlist.
    ///
    /// Entries are `*` (everything), `org/*` (every repository in an org) or
    /// an exact `org/name`.
    pub fn is_allowlisted(&self, allowlist: &[String]) -> bool {
        allowlist.iter().any(|allowed| {
            allowed == "*"
                || *allowed == self.full_name
                || allowed
                    .strip_suffix("/*")
                    .is_some_and(|org| org == self.org)
        })
    }
}

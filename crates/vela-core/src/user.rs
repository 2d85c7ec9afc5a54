//! User types.

use serde::{Deserialize, Serialize};

/// A platform user. The token is the SCM access token stored for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub active: bool,
    pub admin: bool,
}

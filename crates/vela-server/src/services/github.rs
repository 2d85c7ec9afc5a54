//! GitHub API client used as the SCM engine.

use async_trait::async_trait;
use serde::Deserialize;
use vela_core::Scm;

/// GitHub user as returned by `GET /users/{username}`.
#[derive(Debug, Deserialize)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GitHubError> for vela_core::Error {
    fn from(err: GitHubError) -> Self {
        vela_core::Error::Scm(err.to_string())
    }
}

/// SCM engine talking to the GitHub REST API.
pub struct GithubScm {
    client: reqwest::Client,
    api: String,
}

impl GithubScm {
    pub fn new(api: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api: api.into(),
        }
    }

    fn user_url(&self, username: &str) -> String {
        format!(
            "{}/users/{}",
            self.api.trim_end_matches('/'),
            urlencoding::encode(username)
        )
    }

    /// Look up a user by login.
    pub async fn get_user(&self, username: &str, token: &str) -> Result<GitHubUser, GitHubError> {
        let response = self
            .client
            .get(self.user_url(username))
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", "Vela-Server")
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to get user {}: {}",
                username, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Scm for GithubScm {
    async fn user_id(&self, username: &str, token: &str) -> vela_core::Result<String> {
        let user = self.get_user(username, token).await?;
        Ok(user.id.to_string())
    }
}

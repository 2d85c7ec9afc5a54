//! Error types for Vela.

use thiserror::Error;

/// Failures reported by the compiler, queue, SCM and publisher engines.
#[derive(Debug, Error)]
pub enum Error {
    #[error("scm error: {0}")]
    Scm(String),

    #[error("compile failed: {0}")]
    Compile(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_engine() {
        assert_eq!(
            Error::Scm("unknown user octocat".to_string()).to_string(),
            "scm error: unknown user octocat"
        );
        assert_eq!(
            Error::Compile("template depth exceeded".to_string()).to_string(),
            "compile failed: template depth exceeded"
        );
        assert_eq!(
            Error::Queue("no queue routes configured".to_string()).to_string(),
            "queue error: no queue routes configured"
        );
    }
}

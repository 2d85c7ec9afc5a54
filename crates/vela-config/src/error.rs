//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

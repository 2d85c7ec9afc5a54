//! Configuration for the Vela control plane.
//!
//! This crate handles:
//! - Server flags with `VELA_*` environment fallbacks
//! - Go-style duration strings (`5s`, `5m`, `1h30m`)

pub mod duration;
pub mod error;
pub mod server;

pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use server::{LogFormat, ServerConfig};

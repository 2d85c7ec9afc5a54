//! Control plane server for Vela CI.
//!
//! Serves the HTTP API and supervises the background subsystems.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod supervisor;

pub use state::AppState;

//! Engines the server wires into the scheduler.

pub mod compiler;
pub mod github;
pub mod publish;

pub use compiler::NativeCompiler;
pub use github::GithubScm;
pub use publish::DbPublisher;

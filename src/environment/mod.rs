//! Host network environment.
//!
//! # Data Flow
//! ```text
//! Startup:   apply_preconditions (forwarding sysctls) → before the engine starts
//!            enable_docker_compat                       → after the engine starts
//! Shutdown:  disable_docker_compat                      → first unwind step
//! ```
//!
//! # Design Decisions
//! - Every operation is idempotent and safe to repeat
//! - Failures are reported to the caller, which logs and carries on

pub mod system;

use async_trait::async_trait;
use thiserror::Error;

pub use system::SystemEnvironment;

/// Errors from host environment changes.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("failed to write {key}: {source}")]
    Sysctl {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Network state the engine depends on.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Kernel settings required before the engine starts.
    async fn apply_preconditions(&self) -> Result<(), EnvironmentError>;

    /// Let forwarded traffic pass Docker's filter rules.
    async fn enable_docker_compat(&self) -> Result<(), EnvironmentError>;

    /// Undo `enable_docker_compat`.
    async fn disable_docker_compat(&self) -> Result<(), EnvironmentError>;
}

//! Tracing sidecar lifecycle.
//!
//! # Data Flow
//! ```text
//! Startup (tracing enabled):
//!     teardown (clear leftovers of an unclean exit) → deploy
//! Reload changing the engine controller:
//!     teardown → deploy
//! Shutdown:
//!     teardown under its own short-lived cancellation scope
//! ```
//!
//! # Design Decisions
//! - Both operations are idempotent
//! - No failure here is fatal: the engine runs without tracing

pub mod compose;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ParsedConfig;

pub use compose::ComposeSidecar;

/// Errors from sidecar deployment.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("engine exposes no external controller for the sidecar to read")]
    NoController,

    #[error("failed to write {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] crate::environment::EnvironmentError),

    #[error("sidecar operation cancelled")]
    Cancelled,
}

/// Observability deployment running next to the engine.
#[async_trait]
pub trait Sidecar: Send + Sync {
    async fn deploy(&self, scope: &CancellationToken, config: &ParsedConfig) -> Result<(), SidecarError>;

    async fn teardown(&self, scope: &CancellationToken) -> Result<(), SidecarError>;
}

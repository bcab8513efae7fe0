//! Errors that end a supervisor session.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::{ConfigError, FetchError};
use crate::supervisor::StartError;

/// Fatal session errors. Returned after every applied step has been undone.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to fetch initial configuration: {0}")]
    InitialFetch(#[source] FetchError),

    #[error("initial configuration rejected: {0}")]
    InitialConfig(#[source] ConfigError),

    #[error("failed to write {path}: {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start engine: {0}")]
    ProcessStart(#[source] StartError),
}

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command line
//!     → loader.rs (flags → SupervisorConfig, immutable, shared via Arc)
//!
//! engine configuration reference (path or URL)
//!     → source.rs (fetch now, then on every interval tick)
//!     → watcher.rs (local files: re-fetch as soon as the file changes)
//!     → snapshot.rs (bytes + content hash, equality = byte equality)
//!     → validation.rs (ParsedConfig or ConfigError)
//!     → control loop (first snapshot) / reload coordinator (the rest)
//! ```
//!
//! # Design Decisions
//! - Supervisor settings never change after startup
//! - Updates travel through a single-slot mailbox: a newer snapshot replaces
//!   an unconsumed one, the fetch timer never blocks
//! - Nothing reaches the live path without passing validation

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod source;
pub mod validation;
pub mod watcher;

pub use schema::{
    AutoFixMode, ConfigReference, HttpFetchOptions, ReloadMode, SupervisorConfig, UiVariant,
    INTERNAL_CLASH_BIN_NAME, INTERNAL_CONFIG_NAME,
};
pub use snapshot::RawConfigSnapshot;
pub use source::{ConfigFetcher, ConfigSource, ConfigUpdates, FetchError};
pub use validation::{ClashValidator, ConfigError, ConfigValidator, ParsedConfig};

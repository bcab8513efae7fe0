//! Transparent proxy supervisor for the Clash engine.

pub mod config;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod reload;
pub mod sidecar;
pub mod supervisor;

pub use config::schema::SupervisorConfig;
pub use error::SupervisorError;
pub use lifecycle::{ControlLoop, SessionReport, Shutdown};

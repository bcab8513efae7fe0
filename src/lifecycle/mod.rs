//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (control.rs):
//!     Preconditions → Fetch + validate → Write config → Start engine
//!     → Docker compat → Reload watch → Tracing sidecar
//!
//! Shutdown (shutdown.rs):
//!     Signal / test timeout / engine exit / fatal error → one trigger
//!     → Docker compat off → Sidecar teardown → Stop engine
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGHUP → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: nothing starts before the configuration is valid
//! - Ordered shutdown: reverse of startup, each step bounded
//! - Only the steps that were applied get undone

pub mod control;
pub mod phase;
pub mod shutdown;
pub mod signals;

pub use control::{ControlLoop, SessionReport};
pub use phase::LifecyclePhase;
pub use shutdown::{Shutdown, ShutdownReason};

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, stderr)
//!     → events.rs (lifecycle steps, consumed by tests)
//! ```

pub mod events;
pub mod logging;

pub use events::{EventSink, LifecycleEvent};

//! Configuration reload subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigUpdates (latest-wins mailbox)
//!     → coordinator.rs (compare → validate → write live file)
//!     → live.rs (PUT /configs) or ProcessSupervisor::restart
//!     → sidecar redeploy when the controller moved
//! ```

pub mod coordinator;
pub mod live;

pub use coordinator::{write_live_config, ReloadCoordinator, ReloadOutcome};
pub use live::{LiveReloadError, LiveReloader};

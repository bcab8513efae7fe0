//! Engine process supervision.
//!
//! # Data Flow
//! ```text
//! ControlLoop ── start ──▶ ProcessSupervisor ── spawn ──▶ engine
//!                               ▲      │
//! ReloadCoordinator ─ restart ──┘      └─ exit watcher ─▶ Shutdown (unexpected exit)
//! ```

pub mod process;
pub mod state;

pub use process::{
    EngineLauncher, ProcessSupervisor, StartError, StopError, StopOutcome, SupervisedProcess,
};
pub use state::ProcessState;

//! Lifecycle event trace.
//!
//! The control loop and the reload coordinator report every orchestration
//! step here. Nothing listens in production; tests use the trace to check
//! ordering.

use tokio::sync::mpsc;

use crate::config::ReloadMode;
use crate::lifecycle::ShutdownReason;

/// One orchestration step. `ok` is false when a best-effort step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PreconditionsApplied { ok: bool },
    ConfigAccepted { version: String },
    ConfigRejected { version: String },
    ProcessStarted { pid: u32 },
    DockerCompatEnabled { ok: bool },
    ReloadWatchStarted,
    SidecarTornDown { ok: bool },
    SidecarDeployed { ok: bool },
    ConfigUnchanged { version: String },
    ConfigReloaded { version: String, mode: ReloadMode },
    ShutdownTriggered { reason: ShutdownReason },
    DockerCompatDisabled { ok: bool },
    ProcessStopRequested { signalled: bool },
    Stopped,
}

/// Optional sender for lifecycle events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<LifecycleEvent>>,
}

impl EventSink {
    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: LifecycleEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

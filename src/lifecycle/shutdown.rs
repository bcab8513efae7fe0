//! Shutdown coordination for the supervisor.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why the session is ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT, SIGTERM or SIGHUP.
    Signal(&'static str),
    /// Test mode deadline expired.
    TestTimeout,
    /// The engine terminated without being asked to.
    ProcessExited { code: Option<i32> },
    /// A fatal startup or restart failure.
    Fatal(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::TestTimeout => write!(f, "test mode timeout"),
            ShutdownReason::ProcessExited { code: Some(code) } => {
                write!(f, "engine exited with code {}", code)
            }
            ShutdownReason::ProcessExited { code: None } => write!(f, "engine killed by signal"),
            ShutdownReason::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

/// Broadcast-once cancellation shared by every long-running task.
///
/// The first trigger records its reason; later triggers are no-ops apart from
/// returning `false`.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the shutdown. Returns `true` for the first trigger only.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason.clone()).is_ok();
        if first {
            tracing::info!(reason = %reason, "Shutdown triggered");
        } else {
            tracing::debug!(reason = %reason, "Shutdown already in progress");
        }
        self.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the shutdown has been triggered.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Scope cancelled with the session, and cancellable on its own.
    pub fn child_scope(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Reason recorded by the first trigger.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }
}

//! Session lifecycle phases.

use std::fmt;

/// Where the control loop is in its startup/shutdown sequence.
///
/// Phases only move forward; `ShuttingDown` and `Stopped` are terminal for
/// the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Init,
    ConfigReady,
    ProcessRunning,
    SidecarRunning,
    ShuttingDown,
    Stopped,
}

impl LifecyclePhase {
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, LifecyclePhase::ShuttingDown | LifecyclePhase::Stopped)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Init => "init",
            LifecyclePhase::ConfigReady => "config-ready",
            LifecyclePhase::ProcessRunning => "process-running",
            LifecyclePhase::SidecarRunning => "sidecar-running",
            LifecyclePhase::ShuttingDown => "shutting-down",
            LifecyclePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_only_move_forward() {
        assert!(LifecyclePhase::Init < LifecyclePhase::ConfigReady);
        assert!(LifecyclePhase::SidecarRunning < LifecyclePhase::ShuttingDown);
        assert!(!LifecyclePhase::SidecarRunning.is_shutting_down());
        assert!(LifecyclePhase::Stopped.is_shutting_down());
        assert_eq!(LifecyclePhase::ProcessRunning.to_string(), "process-running");
    }
}

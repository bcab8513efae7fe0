//! Supervised process state machine.
//!
//! # State Transitions
//! ```text
//! NotStarted → Starting → Running → Stopping → Stopped
//!                  │          └───────────────→ Stopped   (unexpected exit)
//!                  └──────────────────────────→ Stopped   (spawn failure)
//! Stopped → Starting                                      (restart)
//! ```

/// Lifecycle state of the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ProcessState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }

    /// A process exists (or is being created) in this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ProcessState::*;

    #[test]
    fn test_transitions() {
        assert!(NotStarted.can_transition_to(Starting));
        assert!(Running.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Starting));
        assert!(!NotStarted.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Stopping));
    }

    #[test]
    fn test_active_states() {
        assert!(Running.is_active());
        assert!(Stopping.is_active());
        assert!(!Stopped.is_active());
        assert!(!NotStarted.is_active());
    }
}

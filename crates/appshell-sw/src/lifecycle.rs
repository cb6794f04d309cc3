//! Worker lifecycle state machine and control messages.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SwError, SwResult};

/// Lifecycle state of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Built, install not yet started.
    #[default]
    Parsed,
    /// Staging core assets.
    Installing,
    /// Installed, waiting to be activated.
    Waiting,
    /// Reconciling stores against the manifest.
    Activating,
    /// Serving requests.
    Active,
    /// Install failed or the version was replaced.
    Redundant,
}

impl WorkerState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Waiting)
                | (Waiting, Activating)
                | (Activating, Active)
                | (Installing | Waiting | Activating | Active, Redundant)
        )
    }

    /// Whether fetch events are routed to a worker in this state.
    pub fn handles_fetches(self) -> bool {
        matches!(self, WorkerState::Activating | WorkerState::Active)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Current state plus the time it was entered.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: WorkerState,
    changed_at: Instant,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Parsed,
            changed_at: Instant::now(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn changed_at(&self) -> Instant {
        self.changed_at
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: WorkerState) -> SwResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SwError::State(format!(
                "cannot move from {} to {}",
                self.state, next
            )));
        }
        info!(from = %self.state, to = %next, "Worker state change");
        self.state = next;
        self.changed_at = Instant::now();
        Ok(())
    }
}

/// Messages accepted on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate a waiting version without waiting for clients to close.
    SkipWaiting,
    /// Fetch every manifest resource missing from the content store.
    DownloadOffline,
}

impl ControlMessage {
    /// Parse a raw message. Unrecognized messages yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "skipWaiting" => Some(Self::SkipWaiting),
            "downloadOffline" => Some(Self::DownloadOffline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => "skipWaiting",
            Self::DownloadOffline => "downloadOffline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        for next in [
            WorkerState::Installing,
            WorkerState::Waiting,
            WorkerState::Activating,
            WorkerState::Active,
            WorkerState::Redundant,
        ] {
            lifecycle.transition(next).unwrap();
            assert_eq!(lifecycle.state(), next);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.transition(WorkerState::Active).is_err());
        assert!(lifecycle.transition(WorkerState::Redundant).is_err());
        assert_eq!(lifecycle.state(), WorkerState::Parsed);

        lifecycle.transition(WorkerState::Installing).unwrap();
        lifecycle.transition(WorkerState::Redundant).unwrap();
        assert!(lifecycle.transition(WorkerState::Installing).is_err());
    }

    #[test]
    fn test_handles_fetches() {
        assert!(!WorkerState::Waiting.handles_fetches());
        assert!(WorkerState::Activating.handles_fetches());
        assert!(WorkerState::Active.handles_fetches());
        assert!(!WorkerState::Redundant.handles_fetches());
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(ControlMessage::parse("skipWaiting"), Some(ControlMessage::SkipWaiting));
        assert_eq!(
            ControlMessage::parse("downloadOffline"),
            Some(ControlMessage::DownloadOffline)
        );
        assert_eq!(ControlMessage::parse("SKIPWAITING"), None);
        assert_eq!(ControlMessage::parse(""), None);
    }
}

use crate::error::{HarvestError, Result};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Validating,
    Discovering,
    Fetching,
    Assembling,
    Responding,
    Done,
    Aborted,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Done | DownloadState::Aborted)
    }

    pub fn can_transition_to(self, next: DownloadState) -> bool {
        use DownloadState::*;
        match (self, next) {
            (from, Aborted) => !from.is_terminal(),
            (Validating, Discovering)
            | (Discovering, Fetching)
            | (Fetching, Assembling)
            | (Assembling, Responding)
            | (Responding, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadState::Validating => "validating",
            DownloadState::Discovering => "discovering",
            DownloadState::Fetching => "fetching",
            DownloadState::Assembling => "assembling",
            DownloadState::Responding => "responding",
            DownloadState::Done => "done",
            DownloadState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// The states one download has passed through.
#[derive(Debug, Clone, Serialize)]
pub struct Lifecycle {
    history: Vec<DownloadState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            history: vec![DownloadState::Validating],
        }
    }

    pub fn current(&self) -> DownloadState {
        *self.history.last().unwrap_or(&DownloadState::Validating)
    }

    pub fn history(&self) -> &[DownloadState] {
        &self.history
    }

    pub fn advance(&mut self, next: DownloadState) -> Result<()> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(HarvestError::Unexpected(format!(
                "illegal download state transition {} -> {}",
                current, next
            )));
        }
        debug!("Download state {} -> {}", current, next);
        self.history.push(next);
        Ok(())
    }

    /// Move to `Aborted` because of `error`. A no-op once terminal.
    pub fn abort(&mut self, error: &HarvestError) {
        let current = self.current();
        if current.is_terminal() {
            return;
        }
        warn!("Download aborted while {}: {}", current, error);
        self.history.push(DownloadState::Aborted);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DownloadState::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        for next in [Discovering, Fetching, Assembling, Responding, Done] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(
            lifecycle.history(),
            &[Validating, Discovering, Fetching, Assembling, Responding, Done]
        );
        assert!(lifecycle.current().is_terminal());
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle.advance(Fetching).unwrap_err();
        assert!(matches!(err, HarvestError::Unexpected(_)));
        assert_eq!(lifecycle.current(), Validating);
    }

    #[test]
    fn test_abort_from_any_live_state() {
        for state in [Validating, Discovering, Fetching, Assembling, Responding] {
            assert!(state.can_transition_to(Aborted), "{} -> aborted", state);
        }
        assert!(!Done.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Validating));

        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(Discovering).unwrap();
        lifecycle.abort(&HarvestError::NotFound("nothing".into()));
        lifecycle.abort(&HarvestError::NotFound("twice".into()));
        assert_eq!(lifecycle.history(), &[Validating, Discovering, Aborted]);
    }
}

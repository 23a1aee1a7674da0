//! Fetch and publish state machines for a recording.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Fetch lifecycle of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    /// Discovered, waiting for a slot.
    #[default]
    Pending,
    /// Owned by an in-flight fetch task.
    Downloading,
    /// Artifact is on disk. Publishing is tracked separately.
    Completed,
    /// Last attempt ended in a terminal failure; eligible again after the cooldown.
    Failed,
}

impl FetchState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the orchestrator may claim a row in this state.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: FetchState) -> bool {
        use FetchState::*;

        matches!(
            (self, target),
            (Pending | Failed, Downloading)
                | (Downloading, Completed | Failed | Pending)
                // Operator requeue
                | (Completed | Failed, Pending)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: FetchState) -> Result<FetchState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::validation(format!(
                "invalid fetch transition {} -> {}",
                self, target
            )))
        }
    }
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Publish lifecycle, meaningful once the fetch has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    /// Not fetched yet.
    #[default]
    None,
    /// Fetched, publish not attempted or in progress.
    Pending,
    Published,
    /// Terminal publish failure; the fetched artifact is kept.
    Failed,
    /// No publisher configured, or publishing disabled for this recording.
    Skipped,
}

impl PublishState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "pending" => Some(Self::Pending),
            "published" => Some(Self::Published),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_state_roundtrip() {
        for state in [
            FetchState::Pending,
            FetchState::Downloading,
            FetchState::Completed,
            FetchState::Failed,
        ] {
            assert_eq!(FetchState::parse(state.as_str()), Some(state));
        }
        assert_eq!(FetchState::parse("PENDING"), None);
    }

    #[test]
    fn test_fetch_transitions() {
        assert!(FetchState::Pending.can_transition_to(FetchState::Downloading));
        assert!(FetchState::Failed.can_transition_to(FetchState::Downloading));
        assert!(FetchState::Downloading.can_transition_to(FetchState::Completed));
        assert!(!FetchState::Completed.can_transition_to(FetchState::Downloading));
        assert!(FetchState::Completed.transition_to(FetchState::Failed).is_err());
    }

    #[test]
    fn test_claimable() {
        assert!(FetchState::Pending.is_claimable());
        assert!(FetchState::Failed.is_claimable());
        assert!(!FetchState::Downloading.is_claimable());
        assert!(!FetchState::Completed.is_claimable());
    }

    #[test]
    fn test_publish_state_serialization() {
        let json = serde_json::to_string(&PublishState::Published).unwrap();
        assert_eq!(json, "\"published\"");
        assert_eq!(PublishState::parse("skipped"), Some(PublishState::Skipped));
    }
}

//! Typed records stored in the `app_state` table.

use serde::{Deserialize, Serialize};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation.
    #[default]
    Closed,
    /// Cooldown elapsed; a single probe is allowed through.
    HalfOpen,
    /// Rejecting work until `open_until`.
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half-open",
            Self::Open => "open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted circuit breaker record for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Epoch ms; only meaningful while `state == Open`.
    pub open_until_ms: Option<i64>,
}

/// Which operation an EMA tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmaKind {
    Fetch,
    Publish,
}

impl EmaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Publish => "publish",
        }
    }
}

/// Persisted moving average of an operation's duration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmaRecord {
    pub value_secs: f64,
    pub samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_serialization() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"half-open\"");
    }

    #[test]
    fn test_breaker_record_roundtrip() {
        let record = BreakerRecord {
            state: CircuitState::Open,
            consecutive_failures: 5,
            open_until_ms: Some(1_700_000_000_000),
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: BreakerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}

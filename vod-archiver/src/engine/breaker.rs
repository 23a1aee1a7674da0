//! Persisted circuit breaker over a channel's whole pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::database::models::{BreakerRecord, CircuitState};
use crate::database::repositories::StateStore;
use crate::database::time::now_ms;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    300
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl BreakerConfig {
    fn cooldown_ms(&self) -> i64 {
        i64::try_from(Duration::from_secs(self.cooldown_secs).as_millis()).unwrap_or(i64::MAX)
    }
}

/// Result of asking the breaker for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; work may proceed.
    Granted,
    /// The single half-open probe. Must be resolved by a success, a failure
    /// or [`CircuitBreaker::release_probe`].
    Probe,
    /// Circuit open; skip this tick.
    Rejected,
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub fn is_probe(self) -> bool {
        matches!(self, Self::Probe)
    }
}

struct BreakerInner {
    record: BreakerRecord,
    probe_in_flight: bool,
}

/// Closed/half-open/open admission gate, persisted after every transition.
pub struct CircuitBreaker {
    channel: String,
    config: BreakerConfig,
    store: Arc<dyn StateStore>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Load the breaker for `channel`, starting closed if nothing usable is stored.
    pub async fn load(
        channel: impl Into<String>,
        config: BreakerConfig,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let channel = channel.into();
        let record = match store.get_breaker_state(&channel).await {
            Ok(Some(record)) => {
                info!(
                    channel = %channel,
                    state = %record.state,
                    failures = record.consecutive_failures,
                    "Restored circuit breaker state"
                );
                normalize(record)
            }
            Ok(None) => BreakerRecord::default(),
            Err(e) => {
                warn!(channel = %channel, error = %e, "Unreadable circuit breaker state, starting closed");
                BreakerRecord::default()
            }
        };

        Self {
            channel,
            config,
            store,
            inner: Mutex::new(BreakerInner {
                record,
                probe_in_flight: false,
            }),
        }
    }

    /// May this tick attempt work at all?
    pub async fn allow(&self) -> Admission {
        self.allow_at(now_ms()).await
    }

    pub async fn allow_at(&self, now: i64) -> Admission {
        let mut inner = self.inner.lock().await;
        match inner.record.state {
            CircuitState::Closed => Admission::Granted,
            CircuitState::Open => {
                let open_until = inner.record.open_until_ms.unwrap_or(i64::MIN);
                if now < open_until {
                    return Admission::Rejected;
                }
                inner.record.state = CircuitState::HalfOpen;
                inner.record.open_until_ms = None;
                inner.probe_in_flight = true;
                info!(channel = %self.channel, "Circuit breaker half-open, admitting probe");
                self.persist(&inner.record).await;
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Hand back an unused probe admission.
    pub async fn release_probe(&self) {
        let mut inner = self.inner.lock().await;
        if inner.record.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            debug!(channel = %self.channel, "Probe admission released unused");
        }
    }

    /// Record a success of work admitted with `admission`.
    pub async fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock().await;

        match inner.record.state {
            CircuitState::Closed => {
                if inner.record.consecutive_failures == 0 {
                    return;
                }
                inner.record.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if admission.is_probe() => {
                inner.probe_in_flight = false;
                inner.record = BreakerRecord::default();
                info!(channel = %self.channel, "Probe succeeded, circuit breaker closed");
            }
            // Work admitted before the circuit opened does not close it; only
            // the half-open trial can.
            CircuitState::HalfOpen | CircuitState::Open => {
                debug!(channel = %self.channel, state = %inner.record.state, "Ignoring late success");
                return;
            }
        }

        self.persist(&inner.record).await;
    }

    pub async fn record_failure(&self) {
        self.record_failure_at(now_ms()).await
    }

    pub async fn record_failure_at(&self, now: i64) {
        let mut inner = self.inner.lock().await;
        let failures = inner.record.consecutive_failures.saturating_add(1);
        inner.record.consecutive_failures = failures;

        match inner.record.state {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                inner.record.state = CircuitState::Open;
                inner.record.open_until_ms = Some(now.saturating_add(self.config.cooldown_ms()));
                warn!(
                    channel = %self.channel,
                    failures,
                    cooldown_secs = self.config.cooldown_secs,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.record.state = CircuitState::Open;
                inner.record.open_until_ms = Some(now.saturating_add(self.config.cooldown_ms()));
                warn!(channel = %self.channel, failures, "Probe failed, circuit breaker reopened");
            }
            // Late failures from work admitted before the circuit opened keep
            // the current open-until.
            CircuitState::Closed | CircuitState::Open => {}
        }

        self.persist(&inner.record).await;
    }

    /// Current persisted view.
    pub async fn snapshot(&self) -> BreakerRecord {
        self.inner.lock().await.record
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.record.state
    }

    async fn persist(&self, record: &BreakerRecord) {
        if let Err(e) = self.store.put_breaker_state(&self.channel, record).await {
            warn!(channel = %self.channel, error = %e, "Failed to persist circuit breaker state");
        }
    }
}

fn normalize(mut record: BreakerRecord) -> BreakerRecord {
    match record.state {
        CircuitState::Closed => {
            record.consecutive_failures = 0;
            record.open_until_ms = None;
        }
        CircuitState::HalfOpen => record.open_until_ms = None,
        CircuitState::Open => {}
    }
    record
}

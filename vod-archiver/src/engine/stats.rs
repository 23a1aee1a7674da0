//! Exponential moving averages of fetch and publish durations.
//!
//! Observability only; nothing in the engine reads these back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::database::models::{EmaKind, EmaRecord};
use crate::database::repositories::StateStore;

/// Smoothing factor applied to each new sample.
pub const EMA_ALPHA: f64 = 0.2;

/// Snapshot for the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EmaSnapshot {
    pub fetch_secs: Option<f64>,
    pub publish_secs: Option<f64>,
}

/// Per-channel EMA tracker backed by a [`StateStore`].
pub struct EmaTracker {
    channel: String,
    store: Arc<dyn StateStore>,
    values: Mutex<HashMap<EmaKind, EmaRecord>>,
}

impl EmaTracker {
    /// Load persisted averages for `channel`.
    pub async fn load(channel: impl Into<String>, store: Arc<dyn StateStore>) -> Self {
        let channel = channel.into();
        let mut values = HashMap::new();
        for kind in [EmaKind::Fetch, EmaKind::Publish] {
            match store.get_ema(&channel, kind).await {
                Ok(Some(record)) => {
                    values.insert(kind, record);
                }
                Ok(None) => {}
                Err(e) => warn!(channel = %channel, kind = kind.as_str(), error = %e, "Ignoring unreadable EMA"),
            }
        }

        Self {
            channel,
            store,
            values: Mutex::new(values),
        }
    }

    /// Fold a completed operation's duration into the average and persist it.
    pub async fn record(&self, kind: EmaKind, elapsed: Duration) -> EmaRecord {
        let sample = elapsed.as_secs_f64();
        let updated = {
            let mut values = self.values.lock();
            let entry = values.entry(kind).or_default();
            *entry = fold(*entry, sample);
            *entry
        };

        debug!(
            channel = %self.channel,
            kind = kind.as_str(),
            sample_secs = sample,
            ema_secs = updated.value_secs,
            "Updated duration average"
        );

        if let Err(e) = self.store.put_ema(&self.channel, kind, &updated).await {
            warn!(channel = %self.channel, error = %e, "Failed to persist EMA");
        }
        updated
    }

    pub fn get(&self, kind: EmaKind) -> Option<EmaRecord> {
        self.values.lock().get(&kind).copied()
    }

    pub fn snapshot(&self) -> EmaSnapshot {
        EmaSnapshot {
            fetch_secs: self.get(EmaKind::Fetch).map(|r| r.value_secs),
            publish_secs: self.get(EmaKind::Publish).map(|r| r.value_secs),
        }
    }
}

fn fold(current: EmaRecord, sample: f64) -> EmaRecord {
    let value_secs = if current.samples == 0 {
        sample
    } else {
        EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * current.value_secs
    };
    EmaRecord {
        value_secs,
        samples: current.samples.saturating_add(1),
    }
}

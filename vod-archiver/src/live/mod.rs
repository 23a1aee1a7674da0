//! Live stream tracking and live-to-archive reconciliation.

mod poller;
mod reconcile;

pub use poller::{ChannelSession, LivePoller, PollerConfig, RecorderHandle, Transition};
pub use reconcile::{
    ReconcileConfig, ReconcileOutcome, ReconcileRequest, ReconciliationEngine, select_candidate,
};

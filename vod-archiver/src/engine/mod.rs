//! Processing engine: admission, selection, concurrency and retries.

mod breaker;
mod limiter;
mod orchestrator;
mod progress;
mod retry;
mod selector;
mod stats;

pub use breaker::{Admission, BreakerConfig, CircuitBreaker};
pub use limiter::{ConcurrencyLimiter, SlotToken};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorDeps, TickOutcome, TickReport,
};
pub use progress::ProgressWriter;
pub use retry::{AttemptOutcome, RetryController};
pub use selector::JobSelector;
pub use stats::{EMA_ALPHA, EmaSnapshot, EmaTracker};

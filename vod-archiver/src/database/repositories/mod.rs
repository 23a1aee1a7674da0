//! Repository layer for database access.
//!
//! Each repository is a trait with a SQLx implementation so the engine can be
//! driven by fakes in tests.

pub mod chat;
pub mod reconcile_tx;
pub mod recording;
pub mod state_store;

pub use chat::*;
pub use reconcile_tx::*;
pub use recording::*;
pub use state_store::*;

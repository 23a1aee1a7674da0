//! Database models.
//!
//! These map directly to the schema in `migrations/`.

pub mod chat;
pub mod recording;
pub mod state;

pub use chat::*;
pub use recording::*;
pub use state::*;

//! Recording domain types.

mod placeholder;
mod state;

pub use placeholder::PlaceholderId;
pub use state::{FetchState, PublishState};

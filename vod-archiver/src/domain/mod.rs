//! Domain layer: recording lifecycle types and value objects.

pub mod recording;
pub mod value_objects;

pub use recording::{FetchState, PlaceholderId, PublishState};
pub use value_objects::*;

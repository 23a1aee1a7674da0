//! Service layer: component wiring and the status surface.

pub mod container;
pub mod status;

pub use container::{Collaborators, ServiceContainer};
pub use status::{RecordingProgress, StatusService, StatusSnapshot};

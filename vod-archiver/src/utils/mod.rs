//! Shared helpers.

pub mod duration;
pub mod fs;
pub mod http_client;
pub mod signal;

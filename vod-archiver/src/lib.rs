//! vod-archiver library crate.
//!
//! Mirrors a channel's published recordings to local storage, optionally
//! republishes them, and captures live chat that is later re-attached to the
//! archived recording.

pub mod catalog;
pub mod chat;
pub mod config;
pub mod database;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executors;
pub mod live;
pub mod logging;
pub mod services;
pub mod utils;

pub use error::{Error, FailureClass, Result};

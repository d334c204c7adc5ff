//! lms-server library crate.
//!
//! Course content backend: upload ingress, an asynchronous video transcoding
//! pipeline over a durable task queue, progress tracking with realtime
//! fan-out, and range-aware streaming egress.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod realtime;
pub mod search;
pub mod storage;

pub use error::{Error, Result};

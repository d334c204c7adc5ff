//! HTTP and WebSocket API.

pub mod error;
pub mod jwt;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::AppState;

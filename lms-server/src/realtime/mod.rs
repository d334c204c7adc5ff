//! Realtime push layer.
//!
//! A registry of live WebSocket connections plus the JSON message shapes
//! exchanged over them. Delivery is best-effort: dead peers are pruned on
//! first failed write and nothing is ever surfaced to the sender.

pub mod messages;
pub mod notify;
pub mod registry;

pub use messages::{ClientMessage, ProgressSnapshot, ServerMessage};
pub use notify::ContentReadyHandler;
pub use registry::{ConnectionHandle, ConnectionRegistry, RegistryStats};

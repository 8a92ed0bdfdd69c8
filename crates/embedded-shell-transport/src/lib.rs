//! Transport layer for shell clients.
//!
//! Provides:
//! - Wire protocol (tagged JSON messages)
//! - WebSocket transport driving a `Dispatcher` (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};

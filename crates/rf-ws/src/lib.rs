//! rf-ws: research progress push channel
//!
//! Streams progress events from the [`rf_core::BroadcastHub`] to WebSocket
//! clients. Each connection is one hub observer for as long as it stays open.

pub mod error;
pub mod handler;
pub mod message;
pub mod server;

pub use error::{Result, WsError};
pub use handler::websocket_handler;
pub use message::ClientMessage;
pub use server::{router, serve, WsState, PROGRESS_PATH};

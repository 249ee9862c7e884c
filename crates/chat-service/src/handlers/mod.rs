//! HTTP request handlers.

pub mod admin;
pub mod websocket;

pub use admin::{connected_users, hub_stats, test_broadcast};
pub use websocket::ws_chat;

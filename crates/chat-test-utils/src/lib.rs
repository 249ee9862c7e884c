//! # Chat Test Utilities
//!
//! Shared test utilities for the chat relay service.
//!
//! ## Modules
//!
//! - `fixtures` - Test identities, signed tokens and configuration
//! - `transport` - In-memory WebSocket transport for driving sessions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_test_utils::fixtures::{alice, TestTokenBuilder, TEST_JWT_SECRET};
//! use chat_test_utils::transport::socket_pair;
//!
//! let (mut client, server) = socket_pair();
//! let task = tokio::spawn(session.run(server.sink, server.stream));
//!
//! client.send_json(&serde_json::json!({"type": "ping"}));
//! let pong = client.next_json().await;
//! assert_eq!(pong["type"], "pong");
//! ```
//!
//! The in-memory bus lives next to the real one in
//! `chat_service::bridge::mock`, so unit tests inside the service can use it
//! too.

pub mod fixtures;
pub mod transport;

pub use fixtures::*;
pub use transport::*;

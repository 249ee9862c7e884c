//! Chat Service Library
//!
//! Realtime chat relay. Authenticated WebSocket clients are fanned out to
//! through a per-instance hub, while every chat-relevant event travels over
//! a shared pub/sub bus so that all instances see the same stream.
//!
//! # Architecture
//!
//! ```text
//! WebSocket ─► Session (read pump) ─► Bridge::publish ─► bus
//!                                                         │
//! bus ─► run_subscription ─► HubActor::deliver_local ─────┘
//!                                 │
//!                                 └─► Session (write pump) ─► WebSocket
//! ```
//!
//! # Modules
//!
//! - `actors` - Hub actor and per-connection sessions
//! - `auth` - Token validation before a session is admitted
//! - `bridge` - Bus abstraction, Redis implementation and relay loop
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP and WebSocket upgrade handlers
//! - `observability` - Logging, metrics and health endpoints
//! - `protocol` - Wire envelope and client commands
//! - `routes` - Axum router setup
//! - `runtime` - Supervised lifecycle of the realtime tasks

#![warn(clippy::pedantic)]

pub mod actors;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod protocol;
pub mod routes;
pub mod runtime;

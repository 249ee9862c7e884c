//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers used for every sensitive value in the
//! chat relay: the JWT signing secret, the bus connection URL (which may carry
//! a password) and bearer tokens read off incoming requests.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` and holds one never prints the inner value through `{:?}` or
//! `tracing` fields. The value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct BusSettings {
//!     url: SecretString,
//! }
//!
//! let settings = BusSettings {
//!     url: SecretString::from("redis://:hunter2@localhost:6379"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("hunter2"));
//! assert!(settings.url.expose_secret().starts_with("redis://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

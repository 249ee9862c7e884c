//! Realtime actors.
//!
//! ```text
//! HubActor (singleton per instance)
//! ├── owns the live session set
//! └── fans bus traffic out to N Sessions
//!     └── Session (one per client connection)
//!         ├── read pump: client frames -> bridge / direct replies
//!         └── write pump: outbound queue + keepalive -> client
//! ```
//!
//! All mutation of the session set happens inside the hub loop. Sessions and
//! HTTP handlers talk to it through [`HubHandle`].

pub mod hub;
pub mod messages;
pub mod session;

pub use hub::{HubActor, HubConfig, HubHandle, WeakHubHandle};
pub use messages::{DeliveryReport, SessionHandle};
pub use session::{Session, SessionConfig, SessionEnd};

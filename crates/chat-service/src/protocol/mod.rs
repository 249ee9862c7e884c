//! Wire protocol: client commands in, envelopes out.

pub mod command;
pub mod envelope;

pub use command::ClientCommand;
pub use envelope::{Envelope, UserInfo};

//! strata-core — wire format, message protocol, keys, errors, and config.
//! All other strata crates depend on this one.

pub mod config;
pub mod error;
pub mod key;
pub mod message;
pub mod wire;

pub use error::Error;
pub use key::Key;
pub use message::{Message, MsgKind, Payload};

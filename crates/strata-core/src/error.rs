//! Error taxonomy for the store and networking layers.
//!
//! Every failure is an explicit result value the caller can match on:
//! a vanished peer, a missing key, a mistyped frame, and an expired
//! deadline are all distinct, recoverable conditions. Nothing in library
//! code aborts the process.

use crate::key::Key;
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote side closed or reset the connection mid-operation,
    /// or could not be reached after the configured connect retries.
    #[error("connection to {peer} lost")]
    ConnectionLost { peer: String },

    /// A non-waiting get found no value under the key.
    #[error("key not found: {0}")]
    KeyNotFound(Key),

    /// The remote side sent something this role cannot accept here:
    /// an unknown tag, an unexpected reply kind, a malformed body.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A blocking operation exceeded its deadline.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn connection_lost(peer: impl Into<String>) -> Self {
        Error::ConnectionLost { peer: peer.into() }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Error::ProtocolViolation(detail.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! IDC wire protocol errors

use thiserror::Error;

use super::types::WireType;

/// Failures talking to a DAE server
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// TCP connect or handshake I/O failed
    #[error("cannot connect to {peer}: {source}")]
    Connect {
        /// Address dialled
        peer: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Writing a command failed
    #[error("sending {command} failed: {source}")]
    Send {
        /// Command being sent
        command: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Reading a reply failed
    #[error("receiving reply to {command} failed: {source}")]
    Receive {
        /// Command awaiting a reply
        command: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Reply header inconsistent with its payload
    #[error("malformed reply to {command}: {reason}")]
    Malformed {
        /// Command awaiting a reply
        command: String,
        /// What was wrong
        reason: String,
    },

    /// Reply carried fewer values than its dimensions declare
    #[error("short reply to {command}: expected {expected} values, got {received}")]
    ShortRead {
        /// Command awaiting a reply
        command: String,
        /// Values declared
        expected: usize,
        /// Values present
        received: usize,
    },

    /// Reply type tag differs from the one requested
    #[error("{command} returned {found}, expected {expected}")]
    TypeMismatch {
        /// Command awaiting a reply
        command: String,
        /// Requested type
        expected: WireType,
        /// Type in the reply
        found: WireType,
    },

    /// Server answered with a failure status
    #[error("{command} rejected by server: {reply}")]
    Rejected {
        /// Command sent
        command: String,
        /// Status text returned
        reply: String,
    },

    /// Client already closed
    #[error("connection already closed")]
    Closed,
}

impl ProtocolError {
    /// Stable numeric code handed to error reporters
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Connect { .. } => 1,
            Self::Send { .. } => 2,
            Self::Receive { .. } => 3,
            Self::Malformed { .. } => 4,
            Self::ShortRead { .. } => 5,
            Self::TypeMismatch { .. } => 6,
            Self::Rejected { .. } => 7,
            Self::Closed => 8,
        }
    }
}

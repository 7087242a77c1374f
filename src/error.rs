//! Crate-wide error types

use thiserror::Error;

use crate::idc::ProtocolError;

/// Errors raised while decoding acquisition data
#[derive(Error, Debug)]
pub enum Error {
    /// Magic token or confidence check failed
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// End of data reached in the middle of a field
    #[error("truncated input at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedInput {
        /// Absolute offset of the failed read
        offset: u64,
        /// Bytes the read required
        needed: usize,
        /// Bytes left in the source
        available: u64,
    },

    /// Caller-supplied configuration rejected before decoding
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Stream was unusable when a reader or writer was constructed over it
    #[error("stream in bad state: {0}")]
    BadStream(String),

    /// Requested width does not fit the target type
    #[error("cannot read {requested} bytes into a {width}-byte value")]
    WidthOverflow {
        /// Requested byte count
        requested: usize,
        /// Width of the target type
        width: usize,
    },

    /// Wire protocol failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::Configuration`]
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for [`Error::FormatMismatch`]
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::FormatMismatch(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for harvest
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! # Taxonomy
//!
//! | Variant             | Fatal to the retrieval | Notes                               |
//! |---------------------|------------------------|-------------------------------------|
//! | `StorageExhausted`  | yes                    | advisory free-space check failed    |
//! | `Corrupt`           | for that read          | stored element cannot be decoded    |
//! | `RemoteUnavailable` | no                     | page treated as zero rows           |
//! | `Cancelled`         | yes                    | open sequences closed first         |
//! | `Unsupported`       | yes                    | disallowed sequence mutation        |

use std::io;
use thiserror::Error;

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for harvest
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the backing file
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Element could not be serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Free space on the spill filesystem is smaller than the pending write
    #[error("Storage exhausted: need {needed} bytes, {available} available")]
    StorageExhausted {
        /// Bytes the write needed
        needed: u64,
        /// Bytes reported free at the time of the check
        available: u64,
    },

    /// Entry index was deleted or is out of range
    #[error("Entry not found: {0}")]
    NotFound(usize),

    /// Stored bytes could not be decoded
    #[error("Data corruption: {0}")]
    Corrupt(String),

    /// The store or sequence was already closed
    #[error("Store is closed")]
    Closed,

    /// Operation is deliberately not supported by the container
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Cooperative cancellation signalled by the execution context
    #[error("Retrieval cancelled")]
    Cancelled,

    /// Remote service call or response parsing failed
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Caller supplied an invalid argument or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True for [`Error::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether the error must abort the current retrieval.
    ///
    /// Only remote failures are recoverable: the engine treats them as an
    /// empty page and carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::RemoteUnavailable(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

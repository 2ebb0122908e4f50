//! Crate-wide error type.
//!
//! Mirrors the error kinds signalled at the component API boundary: core
//! components (`BitSignature`, `LshModel`, `KeyValueAdapter`,
//! `SignatureFilter`, `SignatureIndex`, `Transaction`) return these
//! unchanged via [`Result`]. The [`crate::storage::Storage`] façade instead
//! attaches context, logs, and returns a neutral value — see
//! `Storage::last_error`.

use thiserror::Error;

/// All error kinds that can occur at a core component boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Error::OutOfRange(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Short tag used in log lines and in the `tostring()`-style debug views.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::OutOfRange(_) => "OutOfRange",
            Error::Corruption(_) => "Corruption",
            Error::UnsupportedVersion(_) => "UnsupportedVersion",
            Error::NotFound(_) => "NotFound",
            Error::TransientIo(_) => "TransientIO",
            Error::Conflict(_) => "Conflict",
            Error::OutOfMemory(_) => "OutOfMemory",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

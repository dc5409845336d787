//! Error types for varstore
//!
//! Provides a unified error type for all operations.
//!
//! `StoreError` is `Clone`: a single coalesced disk write can complete many
//! attached save futures, so one outcome must fan out to every caller. I/O
//! errors are carried behind `Arc` to keep cloning cheap.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for varstore operations
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    /// A variable-length integer ran past its maximum byte count, a length
    /// was impossible for the remaining input, or a string was not UTF-8.
    /// Always fatal to the decode attempt, never retried.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    // -------------------------------------------------------------------------
    // Frame Errors
    // -------------------------------------------------------------------------
    /// Magic mismatch, checksum mismatch, or truncated frame. On load this
    /// triggers fallback from the primary frame to the backup frame.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    /// The free-space guard tripped before the write touched any file.
    #[error("disk full: {available} bytes available, {required} required")]
    DiskFull { available: u64, required: u64 },

    /// The store no longer accepts writes.
    #[error("store is shut down")]
    Shutdown,

    /// A scheduled I/O task died before it could report an outcome.
    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Arc::new(err))
    }
}

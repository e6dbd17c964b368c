//! Error types and utilities for NATS operations.

use std::time::Duration;

/// Result type for all NATS operations in this crate.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for NATS operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// NATS client/connection errors
    #[error("NATS connection error: {0}")]
    Connection(#[from] async_nats::Error),

    /// Serialization errors when encoding or decoding documents
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timeout
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// KV bucket not found
    #[error("KV bucket '{bucket}' not found")]
    KvBucketNotFound { bucket: String },

    /// KV key already holds a value
    #[error("Key '{key}' already exists in bucket '{bucket}'")]
    KvKeyExists { bucket: String, key: String },

    /// Key contains characters outside the NATS key alphabet
    #[error("Key '{key}' is not a valid NATS KV key")]
    InvalidKey { key: String },

    /// An index with the same key but different options exists
    #[error("Index on '{key}' in bucket '{bucket}' already exists with options {existing}")]
    IndexConflict {
        bucket: String,
        key: String,
        existing: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Generic operation error with context
    #[error("NATS operation failed: {operation} - {details}")]
    Operation { operation: String, details: String },
}

impl Error {
    /// Create an operation error with context
    pub fn operation(op: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Operation {
            operation: op.into(),
            details: details.into(),
        }
    }

    /// Create a KV bucket not found error
    pub fn kv_bucket_not_found(bucket: impl Into<String>) -> Self {
        Self::KvBucketNotFound {
            bucket: bucket.into(),
        }
    }

    /// Create a KV key exists error
    pub fn kv_key_exists(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::KvKeyExists {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create an index conflict error
    pub fn index_conflict(
        bucket: impl Into<String>,
        key: impl Into<String>,
        existing: impl Into<String>,
    ) -> Self {
        Self::IndexConflict {
            bucket: bucket.into(),
            key: key.into(),
            existing: existing.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a timeout error with the given duration
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { timeout: duration }
    }

    /// Returns true if repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Timeout { .. } | Error::Operation { .. }
        )
    }
}

impl From<Error> for ticketry_core::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Connection(_)
            | Error::Timeout { .. }
            | Error::KvBucketNotFound { .. }
            | Error::Operation { .. } => ticketry_core::ErrorKind::Transient,
            Error::KvKeyExists { .. } | Error::IndexConflict { .. } => {
                ticketry_core::ErrorKind::Conflict
            }
            Error::Serialization(_) => ticketry_core::ErrorKind::Serialization,
            Error::InvalidKey { .. } | Error::InvalidConfig { .. } => {
                ticketry_core::ErrorKind::Configuration
            }
        };

        ticketry_core::Error::new(kind)
            .with_message(err.to_string())
            .with_source(err)
    }
}

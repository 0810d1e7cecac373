// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy shared by every storage, sync and repository operation.
//!
//! Expected failure modes (network errors, missing entities) never panic and
//! never escape as anything but a [`CacheError`] value. A missing entity is not
//! an error at all: lookups return `Ok(None)`.

use thiserror::Error;

/// Result type returned by every public operation of this crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by storage backends, the sync bus and the repository.
///
/// `Clone` because one single-flight load result is handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The backend answered with an error (command rejected, bad reply, ...).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// The connection to the remote store failed mid-operation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport is not connected; callers must reconnect explicitly.
    #[error("Transport is disconnected")]
    Disconnected,

    /// A payload could not be encoded or decoded. Retrying will not help.
    #[error("Serialization failed for '{id}': {message}")]
    Serialization { id: String, message: String },

    /// Invalid or missing configuration, detected at the call site.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A previous load for this id failed recently and the cooldown is active.
    #[error("Load of '{id}' suppressed by cooldown after a failed attempt")]
    LoadSuppressed { id: String },

    /// The repository is shutting down and no longer accepts the operation.
    #[error("Repository is shutting down")]
    ShuttingDown,
}

impl CacheError {
    /// Wrap a serde failure with the id of the entity being processed.
    pub fn serialization(id: impl Into<String>, err: &serde_json::Error) -> Self {
        Self::Serialization {
            id: id.into(),
            message: err.to_string(),
        }
    }

    /// Whether the retry helper should attempt the operation again.
    ///
    /// Serialization failures count as backend failures here; they are only
    /// logged differently.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::LoadSuppressed { .. } | Self::ShuttingDown)
    }

    #[must_use]
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }

    /// Errors that mean the link to the remote store is gone.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Disconnected)
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::Connection(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CacheError::Backend("boom".into()).is_retryable());
        assert!(CacheError::Connection("reset".into()).is_retryable());
        assert!(CacheError::Disconnected.is_retryable());
        assert!(CacheError::Serialization { id: "a".into(), message: "eof".into() }.is_retryable());
        assert!(!CacheError::Config("no key".into()).is_retryable());
        assert!(!CacheError::ShuttingDown.is_retryable());
    }

    #[test]
    fn test_serialization_error_keeps_id() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let wrapped = CacheError::serialization("player.42", &err);

        assert!(wrapped.is_serialization());
        assert!(wrapped.to_string().contains("player.42"));
    }

    #[test]
    fn test_redis_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: CacheError = redis::RedisError::from(io).into();

        assert!(err.is_connection());
    }

    #[test]
    fn test_redis_response_error_maps_to_backend() {
        let err: CacheError =
            redis::RedisError::from((redis::ErrorKind::ResponseError, "WRONGTYPE")).into();

        assert!(matches!(err, CacheError::Backend(_)));
    }
}

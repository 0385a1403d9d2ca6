use std::io;
use std::time::Duration;

use thiserror::Error;

/// An invalid cache configuration.
///
/// These errors describe operator misconfiguration and are fatal at startup. A collector must
/// not silently fall back to running without its cache.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configured cache location is an empty string.
    #[error("cache location is empty")]
    EmptyLocation,
    /// The cache location could not be interpreted.
    #[error("malformed cache location {location:?}: {reason}")]
    MalformedLocation {
        /// The location as it was configured.
        location: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// The HTTP client for an object store could not be created.
    #[error("failed to create object store client")]
    Client(#[source] reqwest::Error),
}

impl ConfigurationError {
    pub(crate) fn malformed(location: &str, reason: &'static str) -> Self {
        Self::MalformedLocation {
            location: location.to_owned(),
            reason,
        }
    }
}

/// An error reading from or writing to a snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local filesystem access failed.
    #[error("snapshot file access failed")]
    Io(#[from] io::Error),
    /// The backend rejected our credentials or permissions.
    ///
    /// The attached string contains the backend's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The backend could not be reached or answered with an unexpected error.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The operation did not finish within the caller's deadline.
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// An error turning a snapshot into bytes and back, or persisting it.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot could not be serialized.
    #[error("failed to encode snapshot")]
    Encode(#[source] serde_json::Error),
    /// The persisted bytes are not a valid snapshot.
    #[error("failed to decode snapshot")]
    Decode(#[source] serde_json::Error),
    /// The snapshot could not be written to its store.
    #[error("failed to store snapshot")]
    Store(#[from] StoreError),
}

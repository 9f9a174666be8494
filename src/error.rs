//! Error types for prefixkv.

use std::io;

use thiserror::Error;

/// The result type used throughout prefixkv.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for prefixkv operations.
///
/// A missing key is not an error: lookups return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A range bound was given as an empty, non-`None` byte string.
    #[error("range bound must not be empty")]
    EmptyBound,

    /// A point operation or batch entry used an empty key.
    #[error("key must not be empty")]
    EmptyKey,

    /// The namespace is already held by another database handle.
    #[error("database '{0}' is already in use")]
    AlreadyInUse(String),

    /// The backend aborted a transaction because of a write conflict.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// The backend failed to serve a request.
    #[error("backend error: {0}")]
    Backend(String),

    /// An iterator observed a key outside its namespace.
    #[error("received invalid key from backend: {key} (expected prefix {prefix})")]
    InvalidKey {
        /// The offending physical key, hex encoded.
        key: String,
        /// The namespace prefix, hex encoded.
        prefix: String,
    },

    /// An invalid argument was provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The TiKV client reported an error.
    #[cfg(feature = "tikv")]
    #[error("tikv error: {0}")]
    Tikv(#[from] tikv_client::Error),
}

impl Error {
    /// Creates a new backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a consistency violation for `key` escaping `prefix`.
    pub(crate) fn invalid_key(key: &[u8], prefix: &[u8]) -> Self {
        Error::InvalidKey { key: to_hex(key), prefix: to_hex(prefix) }
    }

    /// Returns true if the error is a transaction write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Lowercase hex rendering used in error messages and dumps.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyInUse("dir/name".to_string());
        assert_eq!(err.to_string(), "database 'dir/name' is already in use");

        let err = Error::invalid_key(b"zz", b"d/n/");
        assert_eq!(
            err.to_string(),
            "received invalid key from backend: 7a7a (expected prefix 642f6e2f)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_is_conflict() {
        assert!(Error::Conflict("k".into()).is_conflict());
        assert!(!Error::backend("down").is_conflict());
    }
}

//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// `KeyNotFound` and `KeyExists` are **expected conditions**, not
/// failures: callers use them to distinguish absence from error and to
/// emulate existence checks. `CasMismatch` signals that the document
/// changed since it was read and the conditional mutation was refused.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key does not exist.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The key already exists (insert refused).
    #[error("key already exists: {key}")]
    KeyExists {
        /// The key that already exists.
        key: String,
    },

    /// The supplied CAS token no longer matches the stored document.
    #[error("CAS mismatch on key: {key}")]
    CasMismatch {
        /// The key whose CAS check failed.
        key: String,
    },

    /// The key is locked by another holder.
    #[error("key is locked: {key}")]
    Locked {
        /// The locked key.
        key: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend rejected the operation for another reason.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Creates a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates a key-exists error.
    pub fn key_exists(key: impl Into<String>) -> Self {
        Self::KeyExists { key: key.into() }
    }

    /// Creates a CAS mismatch error.
    pub fn cas_mismatch(key: impl Into<String>) -> Self {
        Self::CasMismatch { key: key.into() }
    }

    /// Creates a locked-key error.
    pub fn locked(key: impl Into<String>) -> Self {
        Self::Locked { key: key.into() }
    }

    /// Returns `true` if this error means the key was absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// Returns `true` if this error means the key already existed.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::KeyExists { .. })
    }
}

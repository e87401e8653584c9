//! Error types for casdoc core.

use casdoc_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in casdoc core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A model schema is malformed. Fatal, fails model registration.
    #[error("schema validation failed at {path}: {message}")]
    SchemaValidation {
        /// Dotted path of the offending schema node.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// The sanitizer rejected a value. Aborts the operation before any I/O.
    #[error("data validation failed at {path}: {message}")]
    DataValidation {
        /// Dotted path of the offending property.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// An id failed its shape grammar or a key could not be rendered.
    #[error("key error: {message}")]
    Key {
        /// Description of the problem.
        message: String,
    },

    /// A field required by a reference-document index is empty.
    ///
    /// Recoverable when the index is declared optional; fatal otherwise.
    #[error("missing value for field {field} of index {index}")]
    MissingIndexValue {
        /// Name of the index.
        index: String,
        /// The field path whose value was empty.
        field: String,
    },

    /// The document is stale: no CAS token and not a new record.
    #[error("document is stale: read it again before mutating")]
    StaleDocument,

    /// The document was not found (or is soft-deleted under paranoid policy).
    #[error("document not found: {key}")]
    DocumentNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// Storage failure tagged with the document it hit.
    ///
    /// Batch callers use the key to identify which document in a
    /// multi-document workflow failed.
    #[error("storage failure on document {key}: {source}")]
    DocumentStorage {
        /// The key of the failing document.
        key: String,
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Aggregate of storage failures from a batch where partial failure is
    /// tolerated (e.g. `get_multi`).
    #[error("storage failures on {} documents", errors.len())]
    StorageMulti {
        /// The failing keys with their errors.
        errors: Vec<(String, StorageError)>,
    },

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A model with this name is already registered.
    #[error("model already registered: {name}")]
    ModelAlreadyRegistered {
        /// The duplicate name.
        name: String,
    },

    /// No model with this name is registered.
    #[error("model not found: {name}")]
    ModelNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema validation error.
    pub fn schema_validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a data validation error.
    pub fn data_validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataValidation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a key error.
    pub fn key(message: impl Into<String>) -> Self {
        Self::Key {
            message: message.into(),
        }
    }

    /// Creates a missing-index-value error.
    pub fn missing_index_value(index: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingIndexValue {
            index: index.into(),
            field: field.into(),
        }
    }

    /// Creates a document-not-found error.
    pub fn document_not_found(key: impl Into<String>) -> Self {
        Self::DocumentNotFound { key: key.into() }
    }

    /// Creates a storage error tagged with the failing document key.
    pub fn document_storage(key: impl Into<String>, source: StorageError) -> Self {
        Self::DocumentStorage {
            key: key.into(),
            source,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` if this error means a document was absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DocumentNotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            Self::DocumentStorage { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

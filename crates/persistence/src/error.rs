//! Error types for the record store.
//!
//! Errors are grouped by category. Validation and size errors are raised
//! before the backing store is touched; transaction errors are raised only
//! after the batch has been rolled back.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;
use uuid::Uuid;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed or incomplete resource identity.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// An entry was rejected before any I/O took place.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Binary content is larger than the configured maximum.
    #[error("the maximum size ({max} bytes) for binaries was exceeded: actual size {actual} bytes")]
    SizeLimitExceeded { max: usize, actual: usize },

    /// A batch failed and was rolled back.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A stored document could not be turned back into an entry (or vice versa).
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The index and the backends disagree about what exists.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Document store errors.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Blob store errors.
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Errors raised while parsing, extracting or applying resource keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key could not be parsed.
    #[error("malformed resource key '{input}': {reason}")]
    Malformed { input: String, reason: String },

    /// A version was requested but the key has no logical id.
    #[error("resource key for {collection} has a version but no resource id")]
    MissingResourceId { collection: String },

    /// The operation needs a fully versioned key.
    #[error("resource key {key} has no version id")]
    MissingVersionId { key: String },

    /// The payload has no resource type to derive a collection from.
    #[error("cannot extract a key: payload has no resourceType")]
    MissingCollection,
}

/// Errors for entries rejected before any write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Every entry must carry a logical id.
    #[error("entry {index} has no resource id")]
    MissingResourceId { index: usize },

    /// Every entry must carry its own version (self) reference.
    #[error("entry {index} ({key}) has no version id")]
    MissingVersionId { index: usize, key: String },

    /// Binary entries must declare a media type.
    #[error("binary entry {key} has content but no contentType")]
    MissingContentType { key: String },

    /// Binary content is not valid base64.
    #[error("binary entry {key} has undecodable content: {message}")]
    InvalidBinary { key: String, message: String },

    /// The resource payload is not a JSON object.
    #[error("entry {key} payload must be a JSON object")]
    PayloadNotObject { key: String },
}

/// Errors from the batch transaction coordinator.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The batch failed and every document it inserted was removed again.
    #[error("batch {batch_id} failed and was rolled back: {source}")]
    Failed {
        batch_id: Uuid,
        #[source]
        source: Box<StorageError>,
    },

    /// The batch failed and the compensating actions failed as well.
    #[error("batch {batch_id} failed ({cause}) and could not be rolled back: {rollback}")]
    RollbackFailed {
        batch_id: Uuid,
        cause: Box<StorageError>,
        rollback: Box<StorageError>,
    },

    /// The coordinator was used after it left the pending state.
    #[error("batch {batch_id} is {state}, expected pending")]
    NotPending { batch_id: Uuid, state: String },
}

/// Errors converting between entries and stored documents.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// A stored document could not be reconstituted.
    #[error("cannot reconstitute stored record {record_id}: {source}")]
    Decode {
        record_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// An entry could not be turned into a document.
    #[error("cannot serialize record {record_id}: {source}")]
    Encode {
        record_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A JSON value had an unexpected shape.
    #[error("serialization error: {message}")]
    Shape { message: String },
}

/// Errors where an index refers to data that is not there.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// A record implies an externalized blob that the blob backend does not have.
    #[error("blob {key} referenced by a stored record is missing")]
    MissingBlob { key: String },

    /// A requested version (e.g. from a snapshot) does not exist.
    #[error("version {key} referenced by the caller does not exist")]
    MissingVersion { key: String },
}

/// Errors originating from the document store backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// A write was rejected by a uniqueness constraint.
    #[error("constraint violation in {backend_name}: {message}")]
    ConstraintViolation {
        backend_name: String,
        message: String,
    },

    /// Schema or index creation error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Invalid backend configuration.
    #[error("invalid configuration for {backend_name}: {message}")]
    InvalidConfig {
        backend_name: String,
        message: String,
    },
}

/// Errors originating from the blob backend.
#[derive(Error, Debug)]
pub enum BlobError {
    /// The blob backend rejected or failed an operation.
    #[error("blob backend {backend_name} failed to {operation} '{key}': {message}")]
    Operation {
        backend_name: String,
        operation: &'static str,
        key: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The blob backend could not be opened.
    #[error("blob backend {backend_name} unavailable: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Invalid blob backend configuration.
    #[error("invalid blob configuration: {message}")]
    InvalidConfig { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Returns `true` if the error was raised before any I/O took place.
    pub fn is_rejected_before_io(&self) -> bool {
        matches!(
            self,
            StorageError::Key(_) | StorageError::Validation(_) | StorageError::SizeLimitExceeded { .. }
        )
    }

    /// Returns true if a uniqueness constraint rejected the write.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Backend(BackendError::ConstraintViolation { .. })
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(SerializationError::Shape {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        let key = match &err {
            object_store::Error::NotFound { path, .. } => path.clone(),
            _ => String::new(),
        };
        BlobError::Operation {
            backend_name: "object_store".to_string(),
            operation: "access",
            key,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        StorageError::Blob(err.into())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return StorageError::Backend(BackendError::ConstraintViolation {
                    backend_name: "sqlite".to_string(),
                    message: err.to_string(),
                });
            }
        }
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

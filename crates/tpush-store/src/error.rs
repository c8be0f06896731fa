use tpush_types::ObjectHash;

/// Errors from local object source operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The source cannot produce bytes for this hash.
    #[error("object missing from local repository: {0}")]
    ObjectMissing(ObjectHash),

    /// The object was found but under a different kind than its referrer expects.
    #[error("object {hash} has kind {actual}, expected {expected}")]
    KindMismatch {
        hash: ObjectHash,
        expected: String,
        actual: String,
    },

    /// The payload could not be parsed for its kind.
    #[error("corrupt object {hash}: {reason}")]
    CorruptObject { hash: ObjectHash, reason: String },

    /// A named ref does not exist or does not contain a valid hash.
    #[error("ref {name} could not be resolved: {reason}")]
    BadRef { name: String, reason: String },

    /// Serialization failure while writing an object.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying repository.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

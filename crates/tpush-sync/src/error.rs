use thiserror::Error;
use tpush_store::StoreError;
use tpush_types::ObjectHash;

use crate::signing::SigningStage;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("object {0} was not found in the local repository")]
    ObjectMissing(ObjectHash),

    #[error("invalid upload options: {0}")]
    InvalidOptions(String),

    #[error("transfer of {hash} failed: {reason}")]
    TransferFailed { hash: ObjectHash, reason: String },

    #[error("giving up on {hash} after {failures} failed attempts: {reason}")]
    RetriesExhausted {
        hash: ObjectHash,
        failures: u32,
        reason: String,
    },

    #[error("transfer task failed: {0}")]
    TaskFailed(String),

    #[error("upload stalled: {0}")]
    Stalled(String),

    #[error("upload timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("signing failed at {stage}: {reason}")]
    Signing { stage: SigningStage, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] tpush_protocol::ProtocolError),
}

impl SyncError {
    /// Lift a store error, surfacing a missing object as [`SyncError::ObjectMissing`].
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::ObjectMissing(hash) => Self::ObjectMissing(hash),
            other => Self::Store(other),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

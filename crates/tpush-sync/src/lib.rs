//! Upload engine for tpush.
//!
//! Pushes the object graph of a snapshot commit to a remote artifact host.
//! Objects are discovered lazily from the root, deduplicated by hash, and
//! transferred dependencies-first under a bounded number of concurrent
//! requests. The walk stops at any object the remote already holds.
//! Transient failures are retried under a [`PacingPolicy`].

pub mod error;
pub mod graph;
pub mod pacing;
pub mod refs;
pub mod scheduler;
pub mod signing;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{SyncError, SyncResult};
pub use graph::{ObjectGraph, ObjectIndex, ObjectNode, Presence};
pub use pacing::{PacingConfig, PacingDecision, PacingPolicy};
pub use refs::push_root_ref;
pub use scheduler::{TransferScheduler, TransferStats};
pub use signing::{
    offline_sign_repo, SignerError, SignerResult, SigningStage, TargetEntry, TargetSigner,
};
pub use upload::{UploadOptions, UploadReport, UploadState, Uploader, DEFAULT_CONCURRENCY};

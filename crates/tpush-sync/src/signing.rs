//! Offline target signing.
//!
//! When the push credentials carry signing keys, the device-facing metadata
//! is signed locally rather than by the server. The signing tool itself is a
//! collaborator behind [`TargetSigner`]; [`offline_sign_repo`] only drives
//! its stages in order and reports which one failed.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use tpush_protocol::ServerCredentials;
use tpush_types::ObjectHash;

use crate::error::{SyncError, SyncResult};

pub type SignerError = Box<dyn std::error::Error + Send + Sync>;
pub type SignerResult<T> = Result<T, SignerError>;

/// Target format recorded for filesystem snapshots.
pub const SNAPSHOT_FORMAT: &str = "OSTREE";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningStage {
    Init,
    PullTargets,
    AddTarget,
    SignTargets,
    PushTargets,
}

impl std::fmt::Display for SigningStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::PullTargets => "targets pull",
            Self::AddTarget => "targets add",
            Self::SignTargets => "targets sign",
            Self::PushTargets => "targets push",
        };
        f.write_str(name)
    }
}

/// One entry in the targets metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TargetEntry {
    pub name: String,
    pub version: String,
    /// Hex hash identifying the target content.
    pub sha256: String,
    pub hardware_ids: Vec<String>,
    pub format: String,
    /// Snapshots are fetched object by object, so no single length applies.
    pub length: u64,
}

impl TargetEntry {
    /// Entry for a snapshot commit. The commit hash serves as both version
    /// and content hash.
    pub fn for_commit(
        name: impl Into<String>,
        commit: &ObjectHash,
        hardware_ids: &[String],
    ) -> Self {
        let hex = commit.to_hex();
        Self {
            name: name.into(),
            version: hex.clone(),
            sha256: hex,
            hardware_ids: hardware_ids.to_vec(),
            format: SNAPSHOT_FORMAT.to_string(),
            length: 0,
        }
    }
}

/// A tool that maintains and signs a local copy of the targets metadata.
#[async_trait]
pub trait TargetSigner: Send + Sync {
    /// Throw away any local metadata left from earlier runs.
    async fn discard_local_repo(&self) -> SignerResult<()> {
        Ok(())
    }

    async fn init(&self, credentials: &ServerCredentials) -> SignerResult<()>;

    async fn pull_targets(&self) -> SignerResult<()>;

    async fn add_target(&self, target: &TargetEntry) -> SignerResult<()>;

    async fn sign_targets(&self) -> SignerResult<()>;

    async fn push_targets(&self) -> SignerResult<()>;
}

fn stage_failed(stage: SigningStage, err: SignerError) -> SyncError {
    error!(%stage, %err, "signing stage failed");
    SyncError::Signing {
        stage,
        reason: err.to_string(),
    }
}

/// Add `commit` as target `name` and push freshly signed metadata.
///
/// Local metadata is discarded before starting, so keys from a different
/// set of credentials never leak into this run, and again after a
/// successful push.
pub async fn offline_sign_repo(
    signer: &dyn TargetSigner,
    credentials: &ServerCredentials,
    name: &str,
    commit: &ObjectHash,
    hardware_ids: &[String],
) -> SyncResult<()> {
    if !credentials.can_sign_offline() {
        return Err(SyncError::Signing {
            stage: SigningStage::Init,
            reason: "credentials carry no signing keys".into(),
        });
    }

    signer
        .discard_local_repo()
        .await
        .map_err(|e| stage_failed(SigningStage::Init, e))?;
    signer
        .init(credentials)
        .await
        .map_err(|e| stage_failed(SigningStage::Init, e))?;
    signer
        .pull_targets()
        .await
        .map_err(|e| stage_failed(SigningStage::PullTargets, e))?;

    let target = TargetEntry::for_commit(name, commit, hardware_ids);
    signer
        .add_target(&target)
        .await
        .map_err(|e| stage_failed(SigningStage::AddTarget, e))?;

    info!(target = name, commit = %commit.short_hex(), "signing");
    signer
        .sign_targets()
        .await
        .map_err(|e| stage_failed(SigningStage::SignTargets, e))?;
    signer
        .push_targets()
        .await
        .map_err(|e| stage_failed(SigningStage::PushTargets, e))?;

    signer
        .discard_local_repo()
        .await
        .map_err(|e| stage_failed(SigningStage::PushTargets, e))?;
    info!(target = name, "signed targets pushed");
    Ok(())
}

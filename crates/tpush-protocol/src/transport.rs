use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tpush_store::{ObjectKind, StoredObject};
use tpush_types::ObjectHash;

use crate::auth::ServerCredentials;
use crate::endpoint::RemoteEndpoint;
use crate::error::ProtocolResult;

/// Result of one request about an object: an existence check or an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The existence check found the object; no bytes moved.
    AlreadyPresent,
    /// The existence check came back empty; the object needs uploading.
    Absent,
    /// The remote accepted an upload of the object.
    Accepted,
    /// Worth retrying: timeouts, throttling, server-side errors.
    Transient {
        code: Option<u16>,
        reason: String,
        /// Rate signal from the remote (`Retry-After`).
        retry_after: Option<Duration>,
    },
    /// Not worth retrying: rejected credentials, malformed requests.
    Fatal { code: Option<u16>, reason: String },
}

impl TransferOutcome {
    pub fn transient(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Transient {
            code,
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn fatal(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Fatal {
            code,
            reason: reason.into(),
        }
    }

    /// The remote now holds the object.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::AlreadyPresent | Self::Accepted)
    }
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyPresent => write!(f, "already present"),
            Self::Absent => write!(f, "absent"),
            Self::Accepted => write!(f, "accepted"),
            Self::Transient { code: Some(code), reason, .. } => {
                write!(f, "transient error (HTTP {code}): {reason}")
            }
            Self::Transient { reason, .. } => write!(f, "transient error: {reason}"),
            Self::Fatal { code: Some(code), reason } => {
                write!(f, "fatal error (HTTP {code}): {reason}")
            }
            Self::Fatal { reason, .. } => write!(f, "fatal error: {reason}"),
        }
    }
}

/// How an HTTP status code is treated by the transfer primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NotFound,
    Transient,
    Fatal,
}

/// Classify a response status.
///
/// 408, 429 and every 5xx are transient; 404 means "absent" for existence
/// checks; any other 4xx (including 401/403 auth rejections) is fatal.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 => StatusClass::NotFound,
        408 | 429 => StatusClass::Transient,
        500..=599 => StatusClass::Transient,
        _ => StatusClass::Fatal,
    }
}

/// The remote transfer primitive: an existence check and an upload.
///
/// Implementations share one [`RemoteEndpoint`] read-only across all
/// concurrent calls.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Ask whether the remote holds `hash`. Yields `AlreadyPresent`, `Absent`
    /// or a failure; never fails outright.
    async fn check(&self, hash: ObjectHash, kind: ObjectKind) -> TransferOutcome;

    /// Upload `object` unconditionally. Yields `Accepted` or a failure.
    async fn upload(&self, hash: ObjectHash, object: StoredObject) -> TransferOutcome;

    /// Point the remote ref `refs/heads/<name>` at `commit`.
    async fn push_ref(&self, name: &str, commit: &ObjectHash) -> ProtocolResult<()>;
}

/// Authentication step plus transport construction.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Exchange credentials for an authenticated endpoint.
    async fn authenticate(
        &self,
        credentials: &ServerCredentials,
        ca_certificates: Option<&Path>,
    ) -> ProtocolResult<RemoteEndpoint>;

    /// Build the transfer primitive bound to an authenticated endpoint.
    fn transport(&self, endpoint: RemoteEndpoint) -> ProtocolResult<Arc<dyn RemoteTransport>>;
}

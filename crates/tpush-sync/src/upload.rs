//! Upload orchestration: authenticate, resolve the root, run the scheduler.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use tpush_protocol::{RemoteConnector, ServerCredentials};
use tpush_store::LocalObjectSource;
use tpush_types::ObjectHash;

use crate::error::{SyncError, SyncResult};
use crate::pacing::PacingConfig;
use crate::scheduler::TransferScheduler;

/// Concurrent transfers when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 30;

#[derive(Clone, Debug, PartialEq)]
pub struct UploadOptions {
    /// Walk the graph and count requests without contacting the remote.
    pub dry_run: bool,
    pub concurrency_limit: usize,
    pub pacing: PacingConfig,
    /// Wall-clock budget for the transfer loop, checked between scheduler
    /// steps. Requests already running when it expires still finish before
    /// the upload returns. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            concurrency_limit: DEFAULT_CONCURRENCY,
            pacing: PacingConfig::default(),
            timeout: None,
        }
    }
}

impl UploadOptions {
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Orchestrator state. `AuthFailed`, `RootMissing`, `Completed` and
/// `Aborted` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Init,
    Authenticating,
    AuthFailed,
    Resolving,
    RootMissing,
    Running,
    Completed,
    Aborted,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::RootMissing | Self::Completed | Self::Aborted
        )
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Authenticating => "authenticating",
            Self::AuthFailed => "auth-failed",
            Self::Resolving => "resolving",
            Self::RootMissing => "root-missing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// What one upload did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub root: ObjectHash,
    /// True iff the root ended up present on the remote.
    pub success: bool,
    pub state: UploadState,
    pub dry_run: bool,
    /// Checks and uploads sent, including retries and dry-run uploads.
    pub requests_issued: u64,
    /// Objects whose bytes moved to the remote. Always zero in a dry run.
    pub uploads_performed: u64,
    pub already_present: u64,
    pub retries: u64,
    /// Distinct objects discovered from the root.
    pub objects_seen: usize,
    pub elapsed_ms: u64,
    pub stop_reason: Option<String>,
}

impl UploadReport {
    fn new(root: ObjectHash, dry_run: bool) -> Self {
        Self {
            root,
            success: false,
            state: UploadState::Init,
            dry_run,
            requests_issued: 0,
            uploads_performed: 0,
            already_present: 0,
            retries: 0,
            objects_seen: 0,
            elapsed_ms: 0,
            stop_reason: None,
        }
    }

    fn fail(mut self, state: UploadState, reason: SyncError, started: Instant) -> Self {
        error!(%reason, %state, "upload failed");
        self.state = state;
        self.stop_reason = Some(reason.to_string());
        self.elapsed_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Pushes a commit's object graph from a local source to a remote.
pub struct Uploader {
    source: Arc<dyn LocalObjectSource>,
    connector: Arc<dyn RemoteConnector>,
}

impl Uploader {
    pub fn new(source: Arc<dyn LocalObjectSource>, connector: Arc<dyn RemoteConnector>) -> Self {
        Self { source, connector }
    }

    /// Upload everything reachable from `root`.
    ///
    /// Runtime failures (rejected credentials, a missing root, transfer
    /// errors, timeouts) are reported through [`UploadReport::success`] and
    /// [`UploadReport::stop_reason`]. Only invalid options return `Err`.
    pub async fn upload(
        &self,
        credentials: &ServerCredentials,
        root: ObjectHash,
        ca_certificates: Option<&Path>,
        options: &UploadOptions,
    ) -> SyncResult<UploadReport> {
        if options.concurrency_limit == 0 {
            return Err(SyncError::InvalidOptions(
                "concurrency limit must be positive".into(),
            ));
        }
        let started = Instant::now();
        let mut report = UploadReport::new(root, options.dry_run);

        report.state = UploadState::Authenticating;
        info!(
            server = %credentials.server,
            auth = credentials.auth.display_name(),
            "authenticating"
        );
        let transport = match self
            .connector
            .authenticate(credentials, ca_certificates)
            .await
            .and_then(|endpoint| self.connector.transport(endpoint))
        {
            Ok(transport) => transport,
            Err(e) => {
                let reason = SyncError::AuthenticationFailed(e.to_string());
                return Ok(report.fail(UploadState::AuthFailed, reason, started));
            }
        };

        report.state = UploadState::Resolving;
        match self.source.contains(&root) {
            Ok(true) => {}
            Ok(false) => {
                let reason = SyncError::ObjectMissing(root);
                return Ok(report.fail(UploadState::RootMissing, reason, started));
            }
            Err(e) => {
                let reason = SyncError::from_store(e);
                return Ok(report.fail(UploadState::RootMissing, reason, started));
            }
        }

        report.state = UploadState::Running;
        info!(
            root = %root,
            jobs = options.concurrency_limit,
            dry_run = options.dry_run,
            "uploading"
        );
        let mut scheduler = TransferScheduler::new(
            self.source.clone(),
            transport,
            options.concurrency_limit,
            options.pacing.clone(),
        )?;
        scheduler.enqueue(root);

        while !scheduler.is_present(&root) && !scheduler.is_stopped() {
            if let Some(limit) = options.timeout {
                if started.elapsed() >= limit {
                    warn!(
                        in_flight = scheduler.in_flight_len(),
                        "timed out, waiting for running requests"
                    );
                    scheduler.stop(SyncError::TimedOut(limit));
                    break;
                }
            }
            scheduler.run_step(options.dry_run).await;
        }
        if scheduler.is_stopped() {
            scheduler.drain().await;
        }

        let stats = scheduler.stats();
        report.requests_issued = stats.requests_issued;
        report.uploads_performed = stats.uploads_performed;
        report.already_present = stats.already_present;
        report.retries = stats.retries;
        report.objects_seen = scheduler.graph().len();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report.success = scheduler.is_present(&root);

        if report.success {
            report.state = UploadState::Completed;
            if options.dry_run {
                info!(
                    requests = report.requests_issued,
                    "dry run, no objects uploaded"
                );
            } else {
                info!(
                    requests = report.requests_issued,
                    uploaded = report.uploads_performed,
                    already_present = report.already_present,
                    "upload complete"
                );
            }
        } else {
            report.state = UploadState::Aborted;
            report.stop_reason = scheduler.take_stop_reason().map(|e| e.to_string());
            error!(
                reason = report.stop_reason.as_deref().unwrap_or("unknown"),
                "one or more errors while pushing"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        credentials, fast_pacing, nested_snapshot, seed_subgraph, snapshot, StubConnector,
        StubRemote,
    };
    use tpush_protocol::TransferOutcome;
    use tpush_store::{
        CommitObject, DirTree, FileEntry, InMemoryObjectSource, ObjectKind, StoredObject,
    };

    fn options() -> UploadOptions {
        UploadOptions::default()
            .with_concurrency_limit(4)
            .with_pacing(fast_pacing())
    }

    fn uploader(source: &Arc<InMemoryObjectSource>, connector: &Arc<StubConnector>) -> Uploader {
        Uploader::new(source.clone(), connector.clone())
    }

    #[test]
    fn default_options() {
        let opts = UploadOptions::default();
        assert_eq!(opts.concurrency_limit, 30);
        assert!(!opts.dry_run);
        assert!(opts.timeout.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(UploadState::Completed.is_terminal());
        assert!(UploadState::AuthFailed.is_terminal());
        assert!(!UploadState::Running.is_terminal());
        assert_eq!(UploadState::RootMissing.to_string(), "root-missing");
    }

    #[tokio::test]
    async fn zero_concurrency_is_invalid() {
        let source = Arc::new(InMemoryObjectSource::new());
        let connector = Arc::new(StubConnector::new(StubRemote::new()));
        let result = uploader(&source, &connector)
            .upload(
                &credentials(),
                ObjectHash::digest(b"x"),
                None,
                &options().with_concurrency_limit(0),
            )
            .await;
        assert!(matches!(result, Err(SyncError::InvalidOptions(_))));
        assert_eq!(connector.remote.auth_calls(), 0);
    }

    #[tokio::test]
    async fn full_upload_completes() {
        let source = Arc::new(InMemoryObjectSource::new());
        let snap = snapshot(&source, &[b"kernel", b"initrd"]);
        let connector = Arc::new(StubConnector::new(StubRemote::new()));

        let report = uploader(&source, &connector)
            .upload(&credentials(), snap.commit, None, &options())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.state, UploadState::Completed);
        assert_eq!(report.requests_issued, 10);
        assert_eq!(report.uploads_performed, 5);
        assert_eq!(report.objects_seen, 5);
        assert!(report.stop_reason.is_none());
        assert!(connector.remote.holds(&snap.commit));
    }

    #[tokio::test]
    async fn second_run_moves_no_data() {
        let source = Arc::new(InMemoryObjectSource::new());
        let snap = snapshot(&source, &[b"a", b"b", b"c"]);
        let connector = Arc::new(StubConnector::new(StubRemote::new()));
        let uploader = uploader(&source, &connector);

        let first = uploader
            .upload(&credentials(), snap.commit, None, &options())
            .await
            .unwrap();
        assert_eq!(first.uploads_performed, 6);

        let second = uploader
            .upload(&credentials(), snap.commit, None, &options())
            .await
            .unwrap();
        assert!(second.success);
        assert_eq!(second.uploads_performed, 0);
        // The root check answers for the whole graph.
        assert_eq!(second.requests_issued, 1);
        assert_eq!(second.already_present, 1);
        assert_eq!(second.objects_seen, 1);
        assert_eq!(connector.remote.uploads().len(), 6);
    }

    #[tokio::test]
    async fn interrupted_run_resumes_where_it_stopped() {
        let source = Arc::new(InMemoryObjectSource::new());
        let snap = snapshot(&source, &[b"a", b"b"]);
        let remote = StubRemote::new();
        seed_subgraph(&remote, source.as_ref(), snap.tree);
        let connector = Arc::new(StubConnector::new(remote));

        let report = uploader(&source, &connector)
            .upload(&credentials(), snap.commit, None, &options())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.uploads_performed, 2);
        for file in &snap.files {
            assert!(!connector.remote.requests().contains(file));
        }
    }

    #[tokio::test]
    async fn missing_root_issues_no_requests() {
        let source = Arc::new(InMemoryObjectSource::new());
        let connector = Arc::new(StubConnector::new(StubRemote::new()));
        let root = ObjectHash::digest(b"not here");

        let report = uploader(&source, &connector)
            .upload(&credentials(), root, None, &options())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.state, UploadState::RootMissing);
        assert_eq!(report.requests_issued, 0);
        assert!(connector.remote.requests().is_empty());
        assert!(report.stop_reason.unwrap().contains(&root.to_hex()));
    }

    #[tokio::test]
    async fn rejected_credentials_issue_no_requests() {
        let source = Arc::new(InMemoryObjectSource::new());
        let snap = snapshot(&source, &[b"a"]);
        let connector = Arc::new(StubConnector::new(StubRemote::new().rejecting_auth()));

        let report = uploader(&source, &connector)
            .upload(&credentials(), snap.commit, None, &options())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.state, UploadState::AuthFailed);
        assert_eq!(report.requests_issued, 0);
        assert!(connector.remote.requests().is_empty());
        assert!(report.stop_reason.unwrap().starts_with("authentication failed"));
    }

    #[tokio::test]
    async fn dry_run_reports_success_without_uploads() {
        let source = Arc::new(InMemoryObjectSource::new());
        let commit = nested_snapshot(&source, 5);
        let connector = Arc::new(StubConnector::new(StubRemote::new()));

        let report = uploader(&source, &connector)
            .upload(&credentials(), commit, None, &options().with_dry_run(true))
            .await
            .unwrap();

        assert!(report.success);
        assert!(report.dry_run);
        assert_eq!(report.uploads_performed, 0);
        // leaf file, leaf tree, 5 wrappers, meta, commit
        assert_eq!(report.requests_issued, 9);
        assert_eq!(report.objects_seen, 9);
        assert!(connector.remote.requests().is_empty());
        assert_eq!(connector.remote.auth_calls(), 1);
    }

    #[tokio::test]
    async fn only_new_commit_uploaded() {
        let source = Arc::new(InMemoryObjectSource::new());
        let snap = snapshot(&source, &[b"firmware"]);
        let remote = StubRemote::new();
        remote.seed(snap.tree);
        remote.seed(snap.meta);
        remote.seed(snap.files[0]);
        let connector = Arc::new(StubConnector::new(remote));

        let report = uploader(&source, &connector)
            .upload(&credentials(), snap.commit, None, &options())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(connector.remote.uploads(), vec![snap.commit]);
        assert_eq!(report.uploads_performed, 1);
        // Checks for commit, tree and meta, then the commit upload.
        assert_eq!(report.requests_issued, 4);
    }

    #[tokio::test]
    async fn missing_file_aborts_before_commit_and_tree() {
        let source = Arc::new(InMemoryObjectSource::new());
        let f = ObjectHash::digest(b"never written");
        let tree = source.insert(
            DirTree::new(vec![FileEntry { name: "f".into(), checksum: f }], Vec::new())
                .to_stored_object()
                .unwrap(),
        );
        let meta = crate::testing::directory_meta(&source);
        let commit = source.insert(CommitObject::new(tree, meta).to_stored_object().unwrap());
        let connector = Arc::new(StubConnector::new(StubRemote::new()));

        let report = uploader(&source, &connector)
            .upload(&credentials(), commit, None, &options())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.state, UploadState::Aborted);
        let uploads = connector.remote.upload_attempts();
        assert!(!uploads.contains(&commit));
        assert!(!uploads.contains(&tree));
        assert!(report.stop_reason.unwrap().contains(&f.to_hex()));
    }

    #[tokio::test]
    async fn exhausted_retries_abort() {
        let source = Arc::new(InMemoryObjectSource::new());
        let snap = snapshot(&source, &[b"x"]);
        let remote = StubRemote::new();
        remote.script(
            snap.meta,
            std::iter::repeat(TransferOutcome::transient(Some(503), "unavailable")).take(8),
        );
        let connector = Arc::new(StubConnector::new(remote));

        let report = uploader(&source, &connector)
            .upload(&credentials(), snap.commit, None, &options())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.state, UploadState::Aborted);
        assert_eq!(report.retries, 3);
        assert!(report.stop_reason.unwrap().contains("giving up"));
        assert!(!connector.remote.holds(&snap.commit));
    }

    #[tokio::test]
    async fn timeout_aborts_slow_upload() {
        let source = Arc::new(InMemoryObjectSource::new());
        let snap = snapshot(&source, &[b"slow", b"slower"]);
        let remote = StubRemote::new().with_latency(Duration::from_millis(40));
        let connector = Arc::new(StubConnector::new(remote));

        let report = uploader(&source, &connector)
            .upload(
                &credentials(),
                snap.commit,
                None,
                &options().with_timeout(Duration::from_millis(60)),
            )
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.state, UploadState::Aborted);
        assert!(report.stop_reason.unwrap().contains("timed out"));
        // Every request that started ran to completion before the return.
        let remote = &connector.remote;
        assert!(report.requests_issued >= 1);
        assert_eq!(remote.active(), 0);
        assert_eq!(remote.completed(), remote.requests().len());
        assert_eq!(report.requests_issued as usize, remote.requests().len());
    }

    #[tokio::test]
    async fn bare_file_root_uploads_alone() {
        let source = Arc::new(InMemoryObjectSource::new());
        let root = source.insert(StoredObject::new(ObjectKind::File, b"blob".to_vec()));
        let connector = Arc::new(StubConnector::new(StubRemote::new()));

        let report = uploader(&source, &connector)
            .upload(&credentials(), root, None, &options())
            .await
            .unwrap();

        assert!(report.success);
        // existence check, then upload
        assert_eq!(report.requests_issued, 2);
    }
}

//! Test doubles: an in-process remote and snapshot fixtures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tpush_protocol::{
    AuthMethod, ProtocolError, ProtocolResult, RemoteConnector, RemoteEndpoint, RemoteTransport,
    ServerCredentials, TransferOutcome,
};
use tpush_store::{
    CommitObject, DirEntry, DirMeta, DirTree, FileEntry, InMemoryObjectSource, LocalObjectSource,
    ObjectKind, StoredObject,
};
use tpush_types::ObjectHash;

use crate::pacing::PacingConfig;
use crate::scheduler::TransferScheduler;

#[derive(Default)]
struct StubState {
    present: HashSet<ObjectHash>,
    requests: Vec<ObjectHash>,
    checks: Vec<ObjectHash>,
    upload_attempts: Vec<ObjectHash>,
    uploads: Vec<ObjectHash>,
    in_flight: HashSet<ObjectHash>,
    duplicate_dispatches: Vec<ObjectHash>,
    ordering_violations: Vec<ObjectHash>,
    scripted: HashMap<ObjectHash, VecDeque<TransferOutcome>>,
    refs: HashMap<String, ObjectHash>,
    auth_calls: usize,
}

/// Remote artifact host held in memory.
///
/// Records every check and upload, tracks peak concurrency, and flags any
/// upload whose required links the remote does not hold yet.
pub(crate) struct StubRemote {
    state: Mutex<StubState>,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    latency: Duration,
    reject_auth: bool,
}

impl StubRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            latency: Duration::ZERO,
            reject_auth: false,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Put an object on the remote before the upload starts.
    pub fn seed(&self, hash: ObjectHash) {
        self.state().present.insert(hash);
    }

    /// Outcomes returned, in order, for the next requests about `hash`,
    /// checks and uploads alike.
    pub fn script(&self, hash: ObjectHash, outcomes: impl IntoIterator<Item = TransferOutcome>) {
        self.state()
            .scripted
            .entry(hash)
            .or_default()
            .extend(outcomes);
    }

    pub fn holds(&self, hash: &ObjectHash) -> bool {
        self.state().present.contains(hash)
    }

    /// Every request in arrival order.
    pub fn requests(&self) -> Vec<ObjectHash> {
        self.state().requests.clone()
    }

    pub fn checks(&self) -> Vec<ObjectHash> {
        self.state().checks.clone()
    }

    /// Upload requests, whatever their outcome.
    pub fn upload_attempts(&self) -> Vec<ObjectHash> {
        self.state().upload_attempts.clone()
    }

    /// Uploads the remote accepted.
    pub fn uploads(&self) -> Vec<ObjectHash> {
        self.state().uploads.clone()
    }

    pub fn duplicate_dispatches(&self) -> Vec<ObjectHash> {
        self.state().duplicate_dispatches.clone()
    }

    pub fn ordering_violations(&self) -> Vec<ObjectHash> {
        self.state().ordering_violations.clone()
    }

    pub fn refs(&self) -> HashMap<String, ObjectHash> {
        self.state().refs.clone()
    }

    pub fn auth_calls(&self) -> usize {
        self.state().auth_calls
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Requests started but not yet answered.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Requests that ran to the end.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Record a request and hold it for the configured latency. Returns the
    /// scripted outcome, if any.
    async fn round_trip(&self, hash: ObjectHash, upload: bool) -> Option<TransferOutcome> {
        {
            let mut state = self.state();
            state.requests.push(hash);
            if upload {
                state.upload_attempts.push(hash);
            } else {
                state.checks.push(hash);
            }
            if !state.in_flight.insert(hash) {
                state.duplicate_dispatches.push(hash);
            }
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        state.in_flight.remove(&hash);
        let scripted = state.scripted.get_mut(&hash).and_then(VecDeque::pop_front);
        if let Some(outcome) = &scripted {
            if outcome.is_present() {
                state.present.insert(hash);
            }
        }
        scripted
    }
}

#[async_trait]
impl RemoteTransport for StubRemote {
    async fn check(&self, hash: ObjectHash, _kind: ObjectKind) -> TransferOutcome {
        if let Some(outcome) = self.round_trip(hash, false).await {
            return outcome;
        }
        if self.holds(&hash) {
            TransferOutcome::AlreadyPresent
        } else {
            TransferOutcome::Absent
        }
    }

    async fn upload(&self, hash: ObjectHash, object: StoredObject) -> TransferOutcome {
        if let Some(outcome) = self.round_trip(hash, true).await {
            return outcome;
        }
        let mut state = self.state();
        match object.links(&hash) {
            Ok(links) => {
                if links
                    .iter()
                    .any(|link| !link.optional && !state.present.contains(&link.hash))
                {
                    state.ordering_violations.push(hash);
                }
            }
            Err(e) => return TransferOutcome::fatal(Some(400), e.to_string()),
        }
        state.present.insert(hash);
        state.uploads.push(hash);
        TransferOutcome::Accepted
    }

    async fn push_ref(&self, name: &str, commit: &ObjectHash) -> ProtocolResult<()> {
        self.state().refs.insert(name.to_string(), *commit);
        Ok(())
    }
}

/// Connector handing out a shared [`StubRemote`].
pub(crate) struct StubConnector {
    pub remote: Arc<StubRemote>,
}

impl StubConnector {
    pub fn new(remote: StubRemote) -> Self {
        Self {
            remote: Arc::new(remote),
        }
    }
}

#[async_trait]
impl RemoteConnector for StubConnector {
    async fn authenticate(
        &self,
        credentials: &ServerCredentials,
        _ca_certificates: Option<&Path>,
    ) -> ProtocolResult<RemoteEndpoint> {
        self.remote.state().auth_calls += 1;
        if self.remote.reject_auth {
            return Err(ProtocolError::AuthRejected {
                server: credentials.server.clone(),
                status: 401,
            });
        }
        RemoteEndpoint::new(credentials.server.clone())
    }

    fn transport(&self, _endpoint: RemoteEndpoint) -> ProtocolResult<Arc<dyn RemoteTransport>> {
        let transport: Arc<dyn RemoteTransport> = self.remote.clone();
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub(crate) struct Snapshot {
    pub commit: ObjectHash,
    pub tree: ObjectHash,
    pub meta: ObjectHash,
    pub files: Vec<ObjectHash>,
}

impl Snapshot {
    /// Every object reachable from the commit.
    pub fn all(&self) -> Vec<ObjectHash> {
        let mut all = vec![self.commit, self.tree, self.meta];
        all.extend(&self.files);
        all
    }
}

pub(crate) fn directory_meta(source: &InMemoryObjectSource) -> ObjectHash {
    source.insert(
        DirMeta::new(0, 0, 0o40755)
            .to_stored_object()
            .expect("encode dirmeta"),
    )
}

/// Commit -> (tree, meta), tree -> one file per entry in `contents`.
pub(crate) fn snapshot(source: &InMemoryObjectSource, contents: &[&[u8]]) -> Snapshot {
    let files: Vec<ObjectHash> = contents
        .iter()
        .map(|data| source.insert(StoredObject::new(ObjectKind::File, data.to_vec())))
        .collect();
    let entries = files
        .iter()
        .enumerate()
        .map(|(i, checksum)| FileEntry {
            name: format!("file-{i}"),
            checksum: *checksum,
        })
        .collect();
    let tree = source.insert(
        DirTree::new(entries, Vec::new())
            .to_stored_object()
            .expect("encode dirtree"),
    );
    let meta = directory_meta(source);
    let commit = source.insert(
        CommitObject::new(tree, meta)
            .with_subject("snapshot")
            .to_stored_object()
            .expect("encode commit"),
    );
    Snapshot {
        commit,
        tree,
        meta,
        files,
    }
}

/// Commit over a chain of `depth` nested directories, one file at the bottom.
pub(crate) fn nested_snapshot(source: &InMemoryObjectSource, depth: usize) -> ObjectHash {
    let meta = directory_meta(source);
    let leaf = source.insert(StoredObject::new(ObjectKind::File, b"leaf".to_vec()));
    let mut tree = source.insert(
        DirTree::new(
            vec![FileEntry {
                name: "leaf".into(),
                checksum: leaf,
            }],
            Vec::new(),
        )
        .to_stored_object()
        .expect("encode dirtree"),
    );
    for level in 0..depth {
        tree = source.insert(
            DirTree::new(
                Vec::new(),
                vec![DirEntry {
                    name: format!("level-{level}"),
                    tree_checksum: tree,
                    meta_checksum: meta,
                }],
            )
            .to_stored_object()
            .expect("encode dirtree"),
        );
    }
    source.insert(
        CommitObject::new(tree, meta)
            .to_stored_object()
            .expect("encode commit"),
    )
}

/// Hashes reachable from `root` through links the source can follow.
pub(crate) fn reachable(source: &dyn LocalObjectSource, root: ObjectHash) -> HashSet<ObjectHash> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(hash) = stack.pop() {
        if !seen.insert(hash) {
            continue;
        }
        let object = source.get(&hash).expect("reachable object held");
        for link in object.links(&hash).expect("parse links") {
            if link.optional && !source.contains(&link.hash).expect("contains") {
                continue;
            }
            stack.push(link.hash);
        }
    }
    seen
}

/// Seed `remote` with `root` and everything below it, the way a real host
/// ends up after an earlier upload.
pub(crate) fn seed_subgraph(remote: &StubRemote, source: &dyn LocalObjectSource, root: ObjectHash) {
    for hash in reachable(source, root) {
        remote.seed(hash);
    }
}

pub(crate) fn credentials() -> ServerCredentials {
    ServerCredentials::new("https://repo.example.com/api/v3", AuthMethod::Anonymous)
}

/// Short delays so retry tests stay fast.
pub(crate) fn fast_pacing() -> PacingConfig {
    PacingConfig {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
        max_retries: 3,
    }
}

/// Run a scheduler to completion the way the uploader does.
pub(crate) async fn drive(scheduler: &mut TransferScheduler, root: ObjectHash, dry_run: bool) {
    scheduler.enqueue(root);
    while !scheduler.is_present(&root) && !scheduler.is_stopped() {
        scheduler.run_step(dry_run).await;
    }
    scheduler.drain().await;
}

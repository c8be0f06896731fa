//! Dependency-ordered transfer scheduler.
//!
//! [`TransferScheduler`] walks the object graph from the root, one bounded
//! step at a time. Each step has two halves:
//!
//! 1. **Dispatch.** Pop ready objects while fewer than `concurrency_limit`
//!    requests are running. An object the remote has not answered for yet
//!    gets an existence check. An object the remote lacks has its payload
//!    loaded and its links parsed. If any dependency is not yet on the
//!    remote, the object is parked with a pending count and the dependencies
//!    are queued instead. Otherwise its upload is spawned onto a [`JoinSet`].
//! 2. **Collect.** Wait for at least one request to finish, then fold every
//!    finished one back into the graph. A present object releases the parents
//!    parked on it; an absent one goes back into the queue for upload; a
//!    transient failure goes back into the queue after the pacing delay;
//!    anything unrecoverable stops the scheduler.
//!
//! The remote is trusted to hold the whole subgraph of any object it holds,
//! so a check that finds an object ends the walk below it. Re-running an
//! upload against a remote that already has the root costs one request.
//!
//! Once stopped, no new request starts. [`TransferScheduler::drain`] lets the
//! ones already running finish.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use tpush_protocol::{RemoteTransport, TransferOutcome};
use tpush_store::{LocalObjectSource, ObjectKind};
use tpush_types::ObjectHash;

use crate::error::{SyncError, SyncResult};
use crate::graph::{ObjectGraph, ObjectIndex, Presence};
use crate::pacing::{PacingConfig, PacingDecision, PacingPolicy};

/// Counters for one scheduler run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Checks and uploads sent, including retries and dry-run uploads.
    pub requests_issued: u64,
    /// Objects whose bytes the remote accepted.
    pub uploads_performed: u64,
    /// Objects the remote already held.
    pub already_present: u64,
    /// Transient failures that were queued again.
    pub retries: u64,
    /// Highest number of simultaneous requests observed.
    pub peak_in_flight: usize,
}

struct Completion {
    idx: ObjectIndex,
    outcome: TransferOutcome,
    /// Produced by a dry run without touching the remote.
    synthesized: bool,
}

pub struct TransferScheduler {
    source: Arc<dyn LocalObjectSource>,
    transport: Arc<dyn RemoteTransport>,
    graph: ObjectGraph,
    pacing: PacingPolicy,
    concurrency_limit: usize,
    ready: VecDeque<(ObjectIndex, Duration)>,
    in_flight: JoinSet<Completion>,
    stopped: bool,
    stop_reason: Option<SyncError>,
    stats: TransferStats,
}

impl TransferScheduler {
    /// Create a scheduler. `concurrency_limit` must be at least one.
    pub fn new(
        source: Arc<dyn LocalObjectSource>,
        transport: Arc<dyn RemoteTransport>,
        concurrency_limit: usize,
        pacing: PacingConfig,
    ) -> SyncResult<Self> {
        if concurrency_limit == 0 {
            return Err(SyncError::InvalidOptions(
                "concurrency limit must be positive".into(),
            ));
        }
        Ok(Self {
            source,
            transport,
            graph: ObjectGraph::new(),
            pacing: PacingPolicy::new(pacing),
            concurrency_limit,
            ready: VecDeque::new(),
            in_flight: JoinSet::new(),
            stopped: false,
            stop_reason: None,
            stats: TransferStats::default(),
        })
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Why the scheduler stopped, if it did.
    pub fn stop_reason(&self) -> Option<&SyncError> {
        self.stop_reason.as_ref()
    }

    pub fn take_stop_reason(&mut self) -> Option<SyncError> {
        self.stop_reason.take()
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn pacing(&self) -> &PacingPolicy {
        &self.pacing
    }

    pub fn presence(&self, hash: &ObjectHash) -> Option<Presence> {
        self.graph.presence(hash)
    }

    pub fn is_present(&self, hash: &ObjectHash) -> bool {
        self.presence(hash) == Some(Presence::Present)
    }

    // ---------------------------------------------------------------
    // Control
    // ---------------------------------------------------------------

    /// Queue an object for upload. Objects already queued, in flight or
    /// present are left alone.
    pub fn enqueue(&mut self, hash: ObjectHash) -> ObjectIndex {
        let idx = self.graph.get_or_insert(hash, None);
        self.schedule(idx);
        idx
    }

    /// Stop dispatching. The first reason given is kept.
    pub fn stop(&mut self, reason: SyncError) {
        if self.stopped {
            debug!(%reason, "further failure after stop");
            return;
        }
        error!(%reason, "stopping upload");
        self.stopped = true;
        self.stop_reason = Some(reason);
    }

    /// Advance the upload by one bounded step.
    ///
    /// Fills free request slots, then waits for at least one request to
    /// finish. With `dry_run`, no check is made and uploads succeed
    /// immediately without reaching the remote. Does nothing once stopped.
    pub async fn run_step(&mut self, dry_run: bool) {
        if self.stopped {
            return;
        }
        self.fill(dry_run);
        if self.stopped {
            return;
        }

        if self.in_flight.is_empty() {
            if self.ready.is_empty() {
                let waiting = self.graph.nodes().filter(|(_, n)| !n.is_present()).count();
                if waiting > 0 {
                    self.stop(SyncError::Stalled(format!(
                        "{waiting} objects wait on dependencies that cannot complete"
                    )));
                }
            }
            return;
        }

        if let Some(joined) = self.in_flight.join_next().await {
            self.collect(joined);
        }
        while let Some(joined) = self.in_flight.try_join_next() {
            self.collect(joined);
        }
    }

    /// Wait for every running request and record its result.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            self.collect(joined);
        }
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn schedule(&mut self, idx: ObjectIndex) {
        if self.graph.node_mut(idx).mark_queued() {
            self.ready.push_back((idx, Duration::ZERO));
        }
    }

    fn fill(&mut self, dry_run: bool) {
        while self.in_flight.len() < self.concurrency_limit {
            let Some((idx, delay)) = self.ready.pop_front() else {
                break;
            };

            // A dry run never asks the remote, so everything counts as absent.
            if !dry_run && !self.graph.node(idx).known_absent {
                match self.graph.load_kind(idx, self.source.as_ref()) {
                    Ok(kind) => self.dispatch_check(idx, kind, delay),
                    Err(err) => {
                        self.graph.node_mut(idx).abandon();
                        self.stop(SyncError::from_store(err));
                        return;
                    }
                }
                continue;
            }

            let deps = match self.graph.resolve_dependencies(idx, self.source.as_ref()) {
                Ok(deps) => deps,
                Err(err) => {
                    self.graph.node_mut(idx).abandon();
                    self.stop(SyncError::from_store(err));
                    return;
                }
            };

            let unmet: Vec<ObjectIndex> = deps
                .into_iter()
                .filter(|&dep| !self.graph.node(dep).is_present())
                .collect();
            if unmet.is_empty() {
                self.dispatch_upload(idx, delay, dry_run);
            } else {
                self.park(idx, &unmet);
            }
        }
    }

    fn park(&mut self, idx: ObjectIndex, unmet: &[ObjectIndex]) {
        self.graph.node_mut(idx).pending_dependencies = unmet.len();
        for &dep in unmet {
            self.graph.add_parent(dep, idx);
            self.schedule(dep);
        }
        debug!(
            object = %self.graph.node(idx).hash.short_hex(),
            pending = unmet.len(),
            "waiting on dependencies"
        );
    }

    fn dispatch_check(&mut self, idx: ObjectIndex, kind: ObjectKind, delay: Duration) {
        let hash = self.graph.node(idx).hash;
        let transport = Arc::clone(&self.transport);
        self.spawn(idx, delay, false, async move { transport.check(hash, kind).await });
    }

    fn dispatch_upload(&mut self, idx: ObjectIndex, delay: Duration, dry_run: bool) {
        if dry_run {
            self.spawn(idx, delay, true, async { TransferOutcome::Accepted });
            return;
        }
        let node = self.graph.node(idx);
        let hash = node.hash;
        let Some(object) = node.payload().cloned() else {
            self.graph.node_mut(idx).abandon();
            self.stop(SyncError::ObjectMissing(hash));
            return;
        };
        let transport = Arc::clone(&self.transport);
        self.spawn(idx, delay, false, async move { transport.upload(hash, object).await });
    }

    fn spawn<F>(&mut self, idx: ObjectIndex, delay: Duration, synthesized: bool, request: F)
    where
        F: Future<Output = TransferOutcome> + Send + 'static,
    {
        let delay = delay.max(self.pacing.request_delay());
        let node = self.graph.node_mut(idx);
        node.mark_in_flight();
        let hash = node.hash;
        let attempt = node.attempts;
        let request_kind = if node.known_absent || synthesized {
            "upload"
        } else {
            "check"
        };

        self.in_flight.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Completion {
                idx,
                outcome: request.await,
                synthesized,
            }
        });

        self.stats.requests_issued += 1;
        self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.in_flight.len());
        debug!(
            object = %hash.short_hex(),
            request = request_kind,
            attempt,
            ?delay,
            dry_run = synthesized,
            "dispatched"
        );
    }

    fn collect(&mut self, joined: Result<Completion, JoinError>) {
        let Completion {
            idx,
            outcome,
            synthesized,
        } = match joined {
            Ok(completion) => completion,
            Err(e) => {
                self.stop(SyncError::TaskFailed(e.to_string()));
                return;
            }
        };

        let node = self.graph.node_mut(idx);
        node.on_transfer_result(&outcome);
        let hash = node.hash;
        let failures = node.failures;
        let decision = self.pacing.on_outcome(&outcome, failures);

        match outcome {
            TransferOutcome::AlreadyPresent => {
                debug!(object = %hash.short_hex(), "already on remote");
                self.stats.already_present += 1;
                self.release_parents(idx);
            }
            TransferOutcome::Absent => {
                debug!(object = %hash.short_hex(), "missing on remote");
                self.ready.push_back((idx, Duration::ZERO));
            }
            TransferOutcome::Accepted => {
                if !synthesized {
                    debug!(object = %hash.short_hex(), "uploaded");
                    self.stats.uploads_performed += 1;
                }
                self.release_parents(idx);
            }
            TransferOutcome::Transient { ref reason, .. } => {
                let retry_delay = match decision {
                    _ if self.stopped => None,
                    PacingDecision::Delay(delay) => Some(delay),
                    PacingDecision::DispatchNow => Some(Duration::ZERO),
                    PacingDecision::Abandon => None,
                };
                match retry_delay {
                    Some(delay) => {
                        warn!(
                            object = %hash.short_hex(),
                            failures,
                            ?delay,
                            %outcome,
                            "transfer failed, retrying"
                        );
                        self.stats.retries += 1;
                        self.graph.node_mut(idx).mark_queued();
                        self.ready.push_back((idx, delay));
                    }
                    None => {
                        self.graph.node_mut(idx).abandon();
                        self.stop(SyncError::RetriesExhausted {
                            hash,
                            failures,
                            reason: reason.clone(),
                        });
                    }
                }
            }
            TransferOutcome::Fatal { .. } => {
                self.stop(SyncError::TransferFailed {
                    hash,
                    reason: outcome.to_string(),
                });
            }
        }
    }

    /// Decrement the pending count of every parent parked on `idx`, moving
    /// parents whose count reaches zero to the ready queue.
    fn release_parents(&mut self, idx: ObjectIndex) {
        let parents = self.graph.node(idx).parents().to_vec();
        for parent in parents {
            let node = self.graph.node_mut(parent);
            debug_assert!(node.pending_dependencies > 0);
            node.pending_dependencies = node.pending_dependencies.saturating_sub(1);
            if node.pending_dependencies == 0 && node.presence == Presence::Queued {
                self.ready.push_back((parent, Duration::ZERO));
            }
        }
    }
}

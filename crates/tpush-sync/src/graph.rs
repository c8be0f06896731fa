//! Arena of objects discovered during one upload.
//!
//! [`ObjectGraph`] owns every [`ObjectNode`] reached from the root and hands
//! out stable [`ObjectIndex`] handles. Each distinct hash maps to exactly one
//! node, so an object shared by many parents is fetched, checked and uploaded
//! once. Edges run both ways: a node memoizes its dependencies after the first
//! resolution, and each dependency keeps the parents waiting on it.
//!
//! A node's dependencies are only resolved once the remote has reported the
//! node absent. An object the remote already holds is never opened, so its
//! subgraph never enters the arena.
//!
//! # Invariants
//!
//! - Hash to index is a bijection for the lifetime of the graph.
//! - Presence only moves forward (`Unknown -> Queued -> InFlight -> Present`),
//!   except that a transient failure or an `Absent` check sends a node back
//!   to `Queued`.
//! - A node is never marked present while one of its resolved dependencies
//!   is not.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use tpush_protocol::TransferOutcome;
use tpush_store::{LocalObjectSource, ObjectKind, StoreResult, StoredObject};
use tpush_types::ObjectHash;

/// Stable handle to a node in an [`ObjectGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIndex(usize);

impl ObjectIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

/// What the uploader knows about an object on the remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    /// Discovered, not yet scheduled.
    Unknown,
    /// Waiting for dispatch, possibly parked behind its dependencies.
    Queued,
    /// A transfer for it is running.
    InFlight,
    /// The remote holds it. Terminal.
    Present,
    /// The last transfer failed.
    Failed,
}

/// One object in the graph.
#[derive(Clone, Debug)]
pub struct ObjectNode {
    pub hash: ObjectHash,
    /// Kind announced by the referrer; unknown for the root.
    pub expected_kind: Option<ObjectKind>,
    pub presence: Presence,
    /// Dependencies not yet present. The node is dispatched only at zero.
    pub pending_dependencies: usize,
    /// Requests issued for this node, checks and uploads alike.
    pub attempts: u32,
    /// Transient failures seen so far.
    pub failures: u32,
    /// The remote reported this object missing; the next dispatch uploads.
    pub known_absent: bool,
    /// Set when the node failed and must not be queued again.
    pub abandoned: bool,
    payload: Option<StoredObject>,
    dependencies: Option<Vec<ObjectIndex>>,
    parents: Vec<ObjectIndex>,
}

impl ObjectNode {
    fn new(hash: ObjectHash, expected_kind: Option<ObjectKind>) -> Self {
        Self {
            hash,
            expected_kind,
            presence: Presence::Unknown,
            pending_dependencies: 0,
            attempts: 0,
            failures: 0,
            known_absent: false,
            abandoned: false,
            payload: None,
            dependencies: None,
            parents: Vec::new(),
        }
    }

    /// Payload bytes, once loaded from the local source.
    pub fn payload(&self) -> Option<&StoredObject> {
        self.payload.as_ref()
    }

    /// Memoized dependencies, `None` until first resolved.
    pub fn dependencies(&self) -> Option<&[ObjectIndex]> {
        self.dependencies.as_deref()
    }

    /// Nodes waiting on this one.
    pub fn parents(&self) -> &[ObjectIndex] {
        &self.parents
    }

    pub fn is_present(&self) -> bool {
        self.presence == Presence::Present
    }

    /// Record the outcome of a transfer and return the new presence.
    ///
    /// `Absent` puts the node back in `Queued` with `known_absent` set. A
    /// fatal outcome abandons the node for good. A transient one leaves it
    /// `Failed`; the caller decides whether to queue it again.
    pub fn on_transfer_result(&mut self, outcome: &TransferOutcome) -> Presence {
        debug_assert_eq!(self.presence, Presence::InFlight);
        self.presence = match outcome {
            TransferOutcome::Absent => {
                self.known_absent = true;
                Presence::Queued
            }
            TransferOutcome::AlreadyPresent | TransferOutcome::Accepted => {
                // Bytes are on the remote; nothing needs them anymore.
                self.payload = None;
                Presence::Present
            }
            TransferOutcome::Transient { .. } => {
                self.failures += 1;
                Presence::Failed
            }
            TransferOutcome::Fatal { .. } => {
                self.abandoned = true;
                Presence::Failed
            }
        };
        self.presence
    }

    /// `Unknown` or retryable `Failed` to `Queued`. Returns false if the node
    /// was already scheduled, present, or abandoned.
    pub fn mark_queued(&mut self) -> bool {
        match self.presence {
            Presence::Unknown => {}
            Presence::Failed if !self.abandoned => {}
            _ => return false,
        }
        self.presence = Presence::Queued;
        true
    }

    pub fn mark_in_flight(&mut self) {
        debug_assert_eq!(self.presence, Presence::Queued);
        self.presence = Presence::InFlight;
        self.attempts += 1;
    }

    pub fn abandon(&mut self) {
        self.abandoned = true;
        self.presence = Presence::Failed;
    }
}

/// The arena. See the module docs.
#[derive(Debug, Default)]
pub struct ObjectGraph {
    nodes: Vec<ObjectNode>,
    index: HashMap<ObjectHash, ObjectIndex>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node for `hash`, creating it on first sight.
    ///
    /// A kind learned later from a referrer fills in a missing expected kind
    /// but never overrides one already recorded.
    pub fn get_or_insert(&mut self, hash: ObjectHash, kind: Option<ObjectKind>) -> ObjectIndex {
        if let Some(&idx) = self.index.get(&hash) {
            let node = &mut self.nodes[idx.0];
            if node.expected_kind.is_none() {
                node.expected_kind = kind;
            }
            return idx;
        }
        let idx = ObjectIndex(self.nodes.len());
        self.nodes.push(ObjectNode::new(hash, kind));
        self.index.insert(hash, idx);
        idx
    }

    pub fn lookup(&self, hash: &ObjectHash) -> Option<ObjectIndex> {
        self.index.get(hash).copied()
    }

    pub fn node(&self, idx: ObjectIndex) -> &ObjectNode {
        &self.nodes[idx.0]
    }

    pub fn node_mut(&mut self, idx: ObjectIndex) -> &mut ObjectNode {
        &mut self.nodes[idx.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (ObjectIndex, &ObjectNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (ObjectIndex(i), node))
    }

    /// Presence of `hash`, or `None` if the graph never saw it.
    pub fn presence(&self, hash: &ObjectHash) -> Option<Presence> {
        self.lookup(hash).map(|idx| self.node(idx).presence)
    }

    /// Register `parent` as waiting on `child`.
    pub fn add_parent(&mut self, child: ObjectIndex, parent: ObjectIndex) {
        let parents = &mut self.nodes[child.0].parents;
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    /// Kind of the node, reading its payload if no referrer announced one.
    pub fn load_kind(
        &mut self,
        idx: ObjectIndex,
        source: &dyn LocalObjectSource,
    ) -> StoreResult<ObjectKind> {
        if let Some(kind) = self.nodes[idx.0].expected_kind {
            return Ok(kind);
        }
        let node = &mut self.nodes[idx.0];
        let object = source.get(&node.hash)?;
        let kind = object.kind;
        node.expected_kind = Some(kind);
        node.payload = Some(object);
        Ok(kind)
    }

    /// Load the node's payload and return its dependencies.
    ///
    /// The first call parses the payload, reading it from the local source
    /// unless already loaded; later calls return the memoized list. Fails
    /// with `ObjectMissing` when the source has no bytes for this node.
    /// Optional links whose target the source does not hold are skipped.
    /// Duplicate links collapse to one dependency.
    pub fn resolve_dependencies(
        &mut self,
        idx: ObjectIndex,
        source: &dyn LocalObjectSource,
    ) -> StoreResult<Vec<ObjectIndex>> {
        if let Some(deps) = &self.nodes[idx.0].dependencies {
            return Ok(deps.clone());
        }

        let node = &self.nodes[idx.0];
        let hash = node.hash;
        let object = match (&node.payload, node.expected_kind) {
            (Some(object), _) => object.clone(),
            (None, Some(kind)) => source.get_expecting(&hash, kind)?,
            (None, None) => source.get(&hash)?,
        };
        let links = object.links(&hash)?;

        let mut seen = HashSet::new();
        let mut deps = Vec::with_capacity(links.len());
        for link in links {
            if link.optional && !source.contains(&link.hash)? {
                debug!(
                    object = %hash.short_hex(),
                    link = %link.hash.short_hex(),
                    "optional link not held locally, skipping"
                );
                continue;
            }
            if seen.insert(link.hash) {
                deps.push(self.get_or_insert(link.hash, Some(link.kind)));
            }
        }

        let node = &mut self.nodes[idx.0];
        node.expected_kind = Some(object.kind);
        node.payload = Some(object);
        node.dependencies = Some(deps.clone());
        Ok(deps)
    }
}

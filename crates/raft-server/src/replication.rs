//! # replication
//!
//! why: push each committed-to-be entry to every peer without one slow peer holding up the rest
//! relations: fed by pipeline/stages.rs's LogReplicator, delivers through transport.rs, membership from server.rs
//! what: ReplicateRequest callbacks, per-peer actors, ReplicationActorSet, QuorumTracker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use raft_core::NodeId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ReplicationError;
use crate::transport::{PeerInfo, PeerTransport};

type SuccessCallback = Box<dyn Fn(NodeId) + Send + Sync>;
type FailureCallback = Box<dyn Fn(NodeId, &ReplicationError) + Send + Sync>;

/// One encoded entry plus what to do when a peer acknowledges or fails it.
///
/// A single request is shared by every actor through an `Arc`.
pub struct ReplicateRequest {
    entry: Bytes,
    on_success: SuccessCallback,
    on_failure: FailureCallback,
}

impl ReplicateRequest {
    pub fn new<S, F>(entry: Bytes, on_success: S, on_failure: F) -> Self
    where
        S: Fn(NodeId) + Send + Sync + 'static,
        F: Fn(NodeId, &ReplicationError) + Send + Sync + 'static,
    {
        Self {
            entry,
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    /// request whose outcome is only logged
    pub fn fire_and_forget(entry: Bytes) -> Self {
        Self::new(
            entry,
            |peer| debug!(peer, "peer acknowledged entry"),
            |peer, err| debug!(peer, %err, "peer failed entry"),
        )
    }

    pub fn entry(&self) -> &Bytes {
        &self.entry
    }

    fn succeed(&self, peer: NodeId) {
        (self.on_success)(peer)
    }

    fn fail(&self, peer: NodeId, err: &ReplicationError) {
        (self.on_failure)(peer, err)
    }
}

/// Membership change reported by the cluster layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    PeerJoined(PeerInfo),
    PeerLeft(NodeId),
}

struct ReplicationActor {
    peer: PeerInfo,
    transport: Arc<dyn PeerTransport>,
    mailbox: mpsc::Receiver<Arc<ReplicateRequest>>,
}

impl ReplicationActor {
    async fn run(mut self) {
        while let Some(request) = self.mailbox.recv().await {
            let peer = self.peer.node_id;
            match self.transport.send(&self.peer, request.entry.clone()).await {
                Ok(()) => request.succeed(peer),
                Err(err) => {
                    warn!(peer, address = %self.peer.address, %err, "replication to peer failed");
                    request.fail(peer, &ReplicationError::Transport(err));
                }
            }
        }
        debug!(peer = self.peer.node_id, "replication actor stopped");
    }
}

struct ActorHandle {
    mailbox: mpsc::Sender<Arc<ReplicateRequest>>,
    task: JoinHandle<()>,
}

/// One replication actor per known peer.
pub struct ReplicationActorSet {
    actors: DashMap<NodeId, ActorHandle>,
    transport: Arc<dyn PeerTransport>,
    mailbox_capacity: usize,
}

impl ReplicationActorSet {
    pub fn new(transport: Arc<dyn PeerTransport>, mailbox_capacity: usize) -> Self {
        Self {
            actors: DashMap::new(),
            transport,
            mailbox_capacity,
        }
    }

    /// Start an actor for `peer`. Returns false if one already exists.
    pub fn peer_joined(&self, peer: PeerInfo) -> bool {
        let slot = match self.actors.entry(peer.node_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => slot,
        };
        let (mailbox, inbox) = mpsc::channel(self.mailbox_capacity);
        info!(peer = peer.node_id, address = %peer.address, "starting replication actor");
        let actor = ReplicationActor {
            peer,
            transport: Arc::clone(&self.transport),
            mailbox: inbox,
        };
        let task = tokio::spawn(actor.run());
        slot.insert(ActorHandle { mailbox, task });
        true
    }

    /// Stop the actor for `node_id` once its mailbox drains.
    pub fn peer_left(&self, node_id: NodeId) -> bool {
        match self.actors.remove(&node_id) {
            Some(_) => {
                info!(peer = node_id, "stopping replication actor");
                true
            }
            None => false,
        }
    }

    pub fn apply(&self, event: ClusterEvent) -> bool {
        match event {
            ClusterEvent::PeerJoined(peer) => self.peer_joined(peer),
            ClusterEvent::PeerLeft(node_id) => self.peer_left(node_id),
        }
    }

    pub fn peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self.actors.iter().map(|e| *e.key()).collect();
        peers.sort_unstable();
        peers
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Hand `request` to every actor's mailbox.
    ///
    /// Success means at least one actor accepted it; a full or closed mailbox
    /// is reported through the request's failure callback.
    pub fn broadcast(&self, request: ReplicateRequest) -> Result<usize, ReplicationError> {
        let targets = self.targets();
        self.send_to(&targets, request)
    }

    /// Broadcast `entry` and, when `require_quorum` is set, wait until a
    /// majority of the cluster (this node included) holds it.
    pub async fn replicate(
        &self,
        entry: Bytes,
        require_quorum: bool,
    ) -> Result<(), ReplicationError> {
        let targets = self.targets();
        if !require_quorum {
            self.send_to(&targets, ReplicateRequest::fire_and_forget(entry))?;
            return Ok(());
        }

        let (tracker, outcome) = QuorumTracker::new(targets.len());
        let tracker = Arc::new(tracker);
        let on_success = {
            let tracker = Arc::clone(&tracker);
            move |_peer: NodeId| tracker.ack()
        };
        let on_failure = {
            let tracker = Arc::clone(&tracker);
            move |_peer: NodeId, _err: &ReplicationError| tracker.fail()
        };
        self.send_to(&targets, ReplicateRequest::new(entry, on_success, on_failure))?;
        outcome.await.map_err(|_| ReplicationError::Undeliverable)?
    }

    /// Close every mailbox; actors finish what they hold and exit.
    pub fn shutdown(&self) -> Vec<JoinHandle<()>> {
        let peers: Vec<NodeId> = self.actors.iter().map(|e| *e.key()).collect();
        peers
            .into_iter()
            .filter_map(|peer| self.actors.remove(&peer))
            .map(|(_, actor)| actor.task)
            .collect()
    }

    fn targets(&self) -> Vec<(NodeId, mpsc::Sender<Arc<ReplicateRequest>>)> {
        self.actors
            .iter()
            .map(|e| (*e.key(), e.value().mailbox.clone()))
            .collect()
    }

    fn send_to(
        &self,
        targets: &[(NodeId, mpsc::Sender<Arc<ReplicateRequest>>)],
        request: ReplicateRequest,
    ) -> Result<usize, ReplicationError> {
        if targets.is_empty() {
            return Err(ReplicationError::NoPeers);
        }
        let request = Arc::new(request);
        let mut accepted = 0;
        for (peer, mailbox) in targets {
            match mailbox.try_send(Arc::clone(&request)) {
                Ok(()) => accepted += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer, "replication mailbox full, skipping peer");
                    request.fail(*peer, &ReplicationError::MailboxFull(*peer));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    request.fail(*peer, &ReplicationError::MailboxClosed(*peer));
                }
            }
        }
        if accepted == 0 {
            return Err(ReplicationError::Undeliverable);
        }
        Ok(accepted)
    }
}

/// Counts peer outcomes for one entry and resolves once a majority is
/// certain either way.
pub struct QuorumTracker {
    peers: usize,
    required: usize,
    acks: AtomicUsize,
    failures: AtomicUsize,
    outcome: Mutex<Option<oneshot::Sender<Result<(), ReplicationError>>>>,
}

impl QuorumTracker {
    /// `peers` excludes this node, which always counts as one vote.
    pub fn new(peers: usize) -> (Self, oneshot::Receiver<Result<(), ReplicationError>>) {
        let cluster = peers + 1;
        let required = cluster / 2;
        let (tx, rx) = oneshot::channel();
        let tracker = Self {
            peers,
            required,
            acks: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            outcome: Mutex::new(Some(tx)),
        };
        if required == 0 {
            tracker.resolve(Ok(()));
        }
        (tracker, rx)
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn ack(&self) {
        let acks = self.acks.fetch_add(1, Ordering::SeqCst) + 1;
        if acks == self.required {
            self.resolve(Ok(()));
        }
    }

    pub fn fail(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.peers - failures.min(self.peers) < self.required {
            self.resolve(Err(ReplicationError::QuorumNotReached {
                acks: self.acks.load(Ordering::SeqCst),
                failures,
                required: self.required,
            }));
        }
    }

    fn resolve(&self, result: Result<(), ReplicationError>) {
        if let Some(tx) = self.outcome.lock().take() {
            let _ = tx.send(result);
        }
    }
}

//! # driver
//!
//! why: serialize every state change of a node through one task
//! relations: owns raft-core's RaftNode, used by pipeline/, follower.rs, service.rs, timer.rs
//! what: NodeHandle publisher with awaitable completion, snapshot reads, event broadcast

use std::sync::Arc;

use parking_lot::RwLock;
use raft_core::{NodeCommand, NodeError, NodeEvent, NodeId, NodeSnapshot, RaftNode, Role};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::DriverError;
use crate::journal::SharedJournal;

const EVENT_CAPACITY: usize = 256;

struct NodeRequest {
    command: NodeCommand,
    reply: Option<oneshot::Sender<Result<(), NodeError>>>,
}

/// Cloneable front door to a node driver.
///
/// Commands are applied in the order they are published. Reads go straight to
/// a shared snapshot and never wait behind queued commands.
#[derive(Clone)]
pub struct NodeHandle {
    requests: mpsc::Sender<NodeRequest>,
    node: Arc<RwLock<RaftNode>>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeHandle {
    /// Queue a command and wait until the driver has applied it.
    pub async fn publish(&self, command: NodeCommand) -> Result<(), DriverError> {
        let (reply, done) = oneshot::channel();
        self.requests
            .send(NodeRequest {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| DriverError::Shutdown)?;
        done.await.map_err(|_| DriverError::Shutdown)??;
        Ok(())
    }

    /// Queue a command without waiting for it to be applied.
    pub async fn publish_detached(&self, command: NodeCommand) -> Result<(), DriverError> {
        self.requests
            .send(NodeRequest {
                command,
                reply: None,
            })
            .await
            .map_err(|_| DriverError::Shutdown)
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.node.read().snapshot()
    }

    pub fn role(&self) -> Role {
        self.node.read().role()
    }

    pub fn node_id(&self) -> NodeId {
        self.node.read().state().node_id()
    }

    pub fn current_term(&self) -> u64 {
        self.node.read().state().current_term()
    }

    /// term of the local log entry at `index`; index 0 is always term 0
    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.node.read().state().log().term_at(index)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }
}

/// Task that owns the only write access to a [`RaftNode`].
pub struct NodeDriver {
    requests: mpsc::Receiver<NodeRequest>,
    node: Arc<RwLock<RaftNode>>,
    events: broadcast::Sender<NodeEvent>,
    journal: Option<SharedJournal>,
}

impl NodeDriver {
    /// Start the driver. Term and vote changes are persisted to `journal`
    /// before the publishing caller is released.
    pub fn spawn(
        node: RaftNode,
        journal: Option<SharedJournal>,
        capacity: usize,
    ) -> (NodeHandle, JoinHandle<()>) {
        let (requests_tx, requests) = mpsc::channel(capacity);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let node = Arc::new(RwLock::new(node));
        let handle = NodeHandle {
            requests: requests_tx,
            node: Arc::clone(&node),
            events: events.clone(),
        };
        let driver = NodeDriver {
            requests,
            node,
            events,
            journal,
        };
        (handle, tokio::spawn(driver.run()))
    }

    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            let command = request.command;
            let result = self.node.write().handle(command);
            match result {
                Ok(events) => {
                    if events
                        .iter()
                        .any(|e| matches!(e, NodeEvent::TermChanged { .. }))
                    {
                        self.persist_hard_state().await;
                    }
                    for event in events {
                        debug!(?event, command = command.name(), "node event");
                        if let NodeEvent::RoleChanged { from, to } = event {
                            info!(?from, ?to, "node role changed");
                        }
                        // no subscribers is fine
                        let _ = self.events.send(event);
                    }
                    if let Some(reply) = request.reply {
                        let _ = reply.send(Ok(()));
                    }
                }
                Err(err) => {
                    warn!(command = command.name(), %err, "node rejected command");
                    if let Some(reply) = request.reply {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
        debug!("node driver stopped");
    }

    async fn persist_hard_state(&self) {
        let Some(journal) = &self.journal else {
            return;
        };
        let (term, voted_for) = {
            let node = self.node.read();
            (node.state().current_term(), node.state().voted_for())
        };
        if let Err(err) = journal.save_term_and_vote(term, voted_for).await {
            error!(term, %err, "failed to persist term and vote");
        }
    }
}

//! # server
//!
//! why: wire one node's tasks together and tear them down again
//! relations: composition root over driver.rs, pipeline/, replication.rs, follower.rs, timer.rs, service.rs
//! what: RaftServer start/shutdown, cluster membership, client command entry point

use std::sync::Arc;

use raft_core::{NodeCommand, NodeId, NodeSnapshot, RaftNode};
use raft_storage::{FileJournal, InMemoryJournal};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::ClientCommand;
use crate::config::ServerConfig;
use crate::driver::{NodeDriver, NodeHandle};
use crate::error::{DriverError, PipelineError, ServerError};
use crate::follower::FollowerLogWriter;
use crate::journal::SharedJournal;
use crate::pipeline::{CommandPipeline, CommandReceipt, CommittedEntry, PipelineMetricsSnapshot};
use crate::replication::{ClusterEvent, ReplicationActorSet};
use crate::service::RaftService;
use crate::timer::HeartbeatTimer;
use crate::transport::{PeerInfo, PeerTransport};

/// A running raft node.
pub struct RaftServer {
    config: ServerConfig,
    node: NodeHandle,
    actors: Arc<ReplicationActorSet>,
    pipeline: CommandPipeline,
    service: Arc<RaftService>,
    timer: Arc<HeartbeatTimer>,
    tasks: Vec<JoinHandle<()>>,
}

impl RaftServer {
    /// Start with the journal named by `config.journal_path`, or an
    /// in-memory one when unset.
    ///
    /// Installs the tracing subscriber in the configured format unless the
    /// process already has one.
    pub async fn start(
        config: ServerConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        if let Err(err) = config.init_logging() {
            debug!(%err, "keeping existing tracing subscriber");
        }
        let journal = match &config.journal_path {
            Some(path) => SharedJournal::new(FileJournal::new(path)?),
            None => SharedJournal::new(InMemoryJournal::new()),
        };
        Self::start_with_journal(config, transport, journal).await
    }

    /// Replay `journal` into a fresh node and spawn every task.
    pub async fn start_with_journal(
        config: ServerConfig,
        transport: Arc<dyn PeerTransport>,
        journal: SharedJournal,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let (term, voted_for) = journal.load_term_and_vote()?;
        let entries = journal.replay()?;
        let node = RaftNode::restore(config.node_id, term, voted_for, &entries)?;

        let buffer = config.pipeline.buffer_size;
        let (node, driver_task) = NodeDriver::spawn(node, Some(journal.clone()), buffer);
        let actors = Arc::new(ReplicationActorSet::new(
            transport,
            config.replication.mailbox_capacity,
        ));
        let pipeline = CommandPipeline::start(
            &config.pipeline,
            node.clone(),
            Arc::clone(&actors),
            journal.clone(),
            config.replication.require_quorum,
        );
        let (follower, follower_task) = FollowerLogWriter::spawn(node.clone(), journal, buffer);
        let timer = Arc::new(HeartbeatTimer::spawn(&config.raft, node.clone()));
        let service = Arc::new(RaftService::new(node.clone(), timer.clone(), follower));

        info!(
            node_id = config.node_id,
            term = node.current_term(),
            entries = entries.len(),
            "raft server started"
        );
        Ok(Self {
            config,
            node,
            actors,
            pipeline,
            service,
            timer,
            tasks: vec![driver_task, follower_task],
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.node.snapshot()
    }

    pub fn service(&self) -> Arc<RaftService> {
        Arc::clone(&self.service)
    }

    pub async fn create_cluster(&self) -> Result<(), DriverError> {
        self.node.publish(NodeCommand::CreateCluster).await
    }

    pub async fn join_cluster(&self) -> Result<(), DriverError> {
        self.node.publish(NodeCommand::JoinCluster).await
    }

    pub async fn win_election(&self) -> Result<(), DriverError> {
        self.node.publish(NodeCommand::WinCandidateElection).await
    }

    pub fn peer_joined(&self, peer: PeerInfo) -> bool {
        self.actors.apply(ClusterEvent::PeerJoined(peer))
    }

    pub fn peer_left(&self, node_id: NodeId) -> bool {
        self.actors.apply(ClusterEvent::PeerLeft(node_id))
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.actors.peers()
    }

    pub async fn submit<C: ClientCommand>(
        &self,
        command: C,
    ) -> Result<CommandReceipt, PipelineError> {
        self.pipeline.submit(command).await
    }

    pub async fn execute<C: ClientCommand>(
        &self,
        command: C,
    ) -> Result<CommittedEntry, PipelineError> {
        self.pipeline.execute(command).await
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.pipeline.metrics()
    }

    /// Drain the pipeline and the replication actors, then stop the
    /// remaining tasks.
    pub async fn shutdown(self) {
        let RaftServer {
            config,
            actors,
            pipeline,
            timer,
            tasks,
            ..
        } = self;
        timer.stop();
        pipeline.shutdown().await;
        for task in actors.shutdown() {
            if let Err(err) = task.await {
                warn!(%err, "replication actor failed");
            }
        }
        // handles may still be held by callers, so the driver is stopped outright
        for task in tasks {
            task.abort();
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(%err, "server task failed");
                }
            }
        }
        info!(node_id = config.node_id, "raft server stopped");
    }
}

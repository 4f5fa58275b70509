//! # stages
//!
//! why: split a client command's path to the log into small ordered steps
//! relations: chained by pipeline/mod.rs, reads/writes through driver.rs, replication.rs and journal.rs
//! what: Stage trait, IndexCursor, NodeStateValidator, LogEncoder, LogReplicator, LogWriter

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use raft_core::{codec, LogEntry, NodeCommand, Role};
use tracing::{debug, warn};

use crate::command::CommandContext;
use crate::driver::NodeHandle;
use crate::error::PipelineError;
use crate::journal::SharedJournal;
use crate::pipeline::event::ScheduledCommandEvent;
use crate::pipeline::metrics::{PipelineMetrics, StageKind};
use crate::replication::ReplicationActorSet;

/// One step of the pipeline. An `Err` drops the event.
#[async_trait]
pub trait Stage: Send + 'static {
    fn kind(&self) -> StageKind;

    async fn handle(&mut self, event: &mut ScheduledCommandEvent) -> Result<(), PipelineError>;
}

/// Hands out log indices ahead of the commit index so several entries can
/// be in flight at once.
///
/// Releasing a dropped index rewinds the cursor and starts a new epoch;
/// releases from older epochs are ignored because those entries can no
/// longer land in sequence.
#[derive(Debug, Default)]
pub struct IndexCursor {
    state: Mutex<CursorState>,
}

#[derive(Debug, Default)]
struct CursorState {
    next: u64,
    epoch: u64,
}

impl IndexCursor {
    pub fn allocate(&self, commit_index: u64) -> (u64, u64) {
        let mut state = self.state.lock();
        let index = state.next.max(commit_index + 1);
        state.next = index + 1;
        (index, state.epoch)
    }

    pub fn release(&self, index: u64, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if epoch != state.epoch {
            return false;
        }
        state.next = state.next.min(index);
        state.epoch += 1;
        true
    }
}

/// Only a leader accepts client commands.
pub struct NodeStateValidator {
    node: NodeHandle,
}

impl NodeStateValidator {
    pub fn new(node: NodeHandle) -> Self {
        Self { node }
    }
}

#[async_trait]
impl Stage for NodeStateValidator {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    async fn handle(&mut self, _event: &mut ScheduledCommandEvent) -> Result<(), PipelineError> {
        let snapshot = self.node.snapshot();
        if snapshot.role != Role::Leader {
            return Err(PipelineError::NotLeader {
                leader_hint: snapshot.leader_id,
            });
        }
        Ok(())
    }
}

/// Builds the log entry at the next free index in the current term.
pub struct LogEncoder {
    node: NodeHandle,
    cursor: Arc<IndexCursor>,
}

impl LogEncoder {
    pub fn new(node: NodeHandle, cursor: Arc<IndexCursor>) -> Self {
        Self { node, cursor }
    }
}

#[async_trait]
impl Stage for LogEncoder {
    fn kind(&self) -> StageKind {
        StageKind::Encode
    }

    async fn handle(&mut self, event: &mut ScheduledCommandEvent) -> Result<(), PipelineError> {
        let snapshot = self.node.snapshot();
        let payload = event.command().payload()?;
        let (index, epoch) = self.cursor.allocate(snapshot.commit_index);
        let entry = LogEntry::new(
            snapshot.current_term,
            index,
            event.command().command_type(),
            payload,
        );
        let encoded = codec::encode(&entry);
        debug!(
            sequence = event.sequence(),
            term = entry.term,
            index,
            bytes = encoded.len(),
            "encoded log entry"
        );
        event.set_log_entry(entry, encoded, epoch);
        Ok(())
    }
}

/// Hands the encoded entry to the peer actors.
pub struct LogReplicator {
    actors: Arc<ReplicationActorSet>,
    require_quorum: bool,
}

impl LogReplicator {
    pub fn new(actors: Arc<ReplicationActorSet>, require_quorum: bool) -> Self {
        Self {
            actors,
            require_quorum,
        }
    }
}

#[async_trait]
impl Stage for LogReplicator {
    fn kind(&self) -> StageKind {
        StageKind::Replicate
    }

    async fn handle(&mut self, event: &mut ScheduledCommandEvent) -> Result<(), PipelineError> {
        let encoded = event
            .encoded_entry()
            .cloned()
            .ok_or(PipelineError::NotEncoded { stage: "replicate" })?;
        self.actors.replicate(encoded, self.require_quorum).await?;
        Ok(())
    }
}

/// Journals the entry, commits it on the node, then executes the command.
///
/// The entry is refused once the node is no longer leader of the entry's term.
pub struct LogWriter {
    node: NodeHandle,
    journal: SharedJournal,
    metrics: Arc<PipelineMetrics>,
}

impl LogWriter {
    pub fn new(node: NodeHandle, journal: SharedJournal, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            node,
            journal,
            metrics,
        }
    }
}

#[async_trait]
impl Stage for LogWriter {
    fn kind(&self) -> StageKind {
        StageKind::Write
    }

    async fn handle(&mut self, event: &mut ScheduledCommandEvent) -> Result<(), PipelineError> {
        let not_encoded = || PipelineError::NotEncoded { stage: "write" };
        let (term, index) = event
            .log_entry()
            .map(|entry| (entry.term, entry.index))
            .ok_or_else(not_encoded)?;
        let encoded = event.encoded_entry().cloned().ok_or_else(not_encoded)?;

        let log = self.journal.lock_log().await;
        let snapshot = self.node.snapshot();
        // a newer leader may have taken over while the entry was replicating
        if snapshot.role != Role::Leader || snapshot.current_term != term {
            return Err(PipelineError::NotLeader {
                leader_hint: snapshot.leader_id,
            });
        }
        let expected = snapshot.commit_index + 1;
        if index != expected {
            return Err(PipelineError::OutOfSequence { index, expected });
        }

        self.journal
            .write_block(encoded)
            .await
            .map_err(PipelineError::Journal)?;
        self.node
            .publish(NodeCommand::CommitEntry { term, index })
            .await?;
        drop(log);
        self.metrics.record_committed();

        let context = CommandContext {
            node_id: snapshot.node_id,
            term,
            index,
        };
        match event.command().execute(&context) {
            Ok(()) => {
                self.node.publish(NodeCommand::ApplyEntry { index }).await?;
                self.metrics.record_applied();
            }
            // the entry stays committed; only the local side effect failed
            Err(err) => {
                self.metrics.record_execution_failure();
                warn!(
                    index,
                    command_type = event.command().command_type(),
                    %err,
                    "command execution failed"
                );
            }
        }
        Ok(())
    }
}

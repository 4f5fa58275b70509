//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: owns log.rs's LogIndex, driven by command.rs's NodeCommand, wrapped by raft-server's driver
//! what: Role enum, NodeState data, RaftNode transition handler, NodeSnapshot reads

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{NodeCommand, NodeEvent};
use crate::error::NodeError;
use crate::log::{LogEntry, LogIndex};

/// Identifier of a node in the cluster.
pub type NodeId = u64;

/// The roles a node moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Not yet part of a cluster
    Initial,
    /// Passive state - listens for heartbeats, votes when asked
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl Default for Role {
    fn default() -> Self {
        Self::Initial
    }
}

/// Volatile and persistent raft state of one node.
///
/// Fields are read through accessors only; every write goes through
/// [`RaftNode::handle`].
#[derive(Debug, Clone)]
pub struct NodeState {
    node_id: NodeId,
    current_term: u64,
    commit_index: u64,
    last_applied: u64,
    leader_id: Option<NodeId>,
    voted_for: Option<NodeId>,
    log: LogIndex,
}

impl NodeState {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            current_term: 0,
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            voted_for: None,
            log: LogIndex::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn log(&self) -> &LogIndex {
        &self.log
    }
}

/// Point-in-time copy of a node's externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub role: Role,
    pub current_term: u64,
    pub commit_index: u64,
    pub last_applied: u64,
    pub leader_id: Option<NodeId>,
    pub voted_for: Option<NodeId>,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// A single Raft node in the cluster
#[derive(Debug)]
pub struct RaftNode {
    role: Role,
    state: NodeState,
}

impl RaftNode {
    /// Create a node that has not yet created or joined a cluster
    pub fn new(node_id: NodeId) -> Self {
        Self {
            role: Role::Initial,
            state: NodeState::new(node_id),
        }
    }

    /// Rebuild a node from its persisted term/vote and journaled entries, in
    /// the order they were written.
    ///
    /// A block at index `i` supersedes every earlier block at `i` or above.
    pub fn restore(
        node_id: NodeId,
        term: u64,
        voted_for: Option<NodeId>,
        entries: &[LogEntry],
    ) -> Result<Self, NodeError> {
        let mut state = NodeState::new(node_id);
        state.current_term = term;
        for entry in entries {
            if entry.index <= state.log.last_index() {
                state.log.truncate(entry.index);
            }
            state.log.set(entry.index, entry.term)?;
            state.current_term = state.current_term.max(entry.term);
            state.commit_index = entry.index;
        }
        if state.current_term == term {
            state.voted_for = voted_for;
        }
        debug!(
            node_id,
            term = state.current_term,
            commit_index = state.commit_index,
            "restored node state from journal"
        );
        Ok(Self {
            role: Role::Initial,
            state,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.state.node_id,
            role: self.role,
            current_term: self.state.current_term,
            commit_index: self.state.commit_index,
            last_applied: self.state.last_applied,
            leader_id: self.state.leader_id,
            voted_for: self.state.voted_for,
            last_log_index: self.state.log.last_index(),
            last_log_term: self.state.log.last_term(),
        }
    }

    /// Apply one command, returning the notifications it produced.
    ///
    /// Guards run before any field is written, so an `Err` leaves the node
    /// exactly as it was.
    pub fn handle(&mut self, command: NodeCommand) -> Result<Vec<NodeEvent>, NodeError> {
        let mut events = Vec::new();
        match command {
            NodeCommand::CreateCluster => {
                self.permit(&[Role::Initial], &command)?;
                self.become_role(Role::Leader, &mut events);
                self.set_leader(Some(self.state.node_id), &mut events);
            }
            NodeCommand::JoinCluster => {
                self.permit(&[Role::Initial], &command)?;
                self.become_role(Role::Follower, &mut events);
            }
            NodeCommand::SetNewTerm { term } => {
                let current = self.state.current_term;
                if term < current {
                    return Err(NodeError::TermRegression {
                        current,
                        attempted: term,
                    });
                }
                // an equal term is re-announced and clears the vote; only a
                // newer one displaces the leader
                if term > current {
                    self.set_leader(None, &mut events);
                    if matches!(self.role, Role::Leader | Role::Candidate) {
                        self.become_role(Role::Follower, &mut events);
                    }
                }
                self.state.current_term = term;
                self.state.voted_for = None;
                events.push(NodeEvent::TermChanged { term });
            }
            NodeCommand::TimeoutLeaderHeartbeat => {
                self.permit(&[Role::Follower, Role::Candidate], &command)?;
                self.state.current_term += 1;
                self.state.voted_for = Some(self.state.node_id);
                self.set_leader(None, &mut events);
                self.become_role(Role::Candidate, &mut events);
                events.push(NodeEvent::TermChanged {
                    term: self.state.current_term,
                });
            }
            NodeCommand::WinCandidateElection => {
                self.permit(&[Role::Candidate], &command)?;
                self.become_role(Role::Leader, &mut events);
                self.set_leader(Some(self.state.node_id), &mut events);
            }
            NodeCommand::CancelElection => {
                self.permit(&[Role::Candidate], &command)?;
                self.become_role(Role::Follower, &mut events);
            }
            NodeCommand::SetLeaderInformation { leader_id } => {
                self.set_leader(Some(leader_id), &mut events);
            }
            NodeCommand::CommitEntry { term, index } => {
                let current = self.state.current_term;
                if term > current {
                    return Err(NodeError::CommitAheadOfTerm {
                        index,
                        entry_term: term,
                        current,
                    });
                }
                self.state.log.set(index, term)?;
                self.state.commit_index = self.state.commit_index.max(index);
            }
            NodeCommand::ApplyEntry { index } => {
                self.state.last_applied = self.state.last_applied.max(index);
            }
            NodeCommand::TruncateLog { from_index } => {
                let commit_index = self.state.commit_index;
                if from_index > commit_index {
                    return Err(NodeError::TruncateAheadOfCommit {
                        from_index,
                        commit_index,
                    });
                }
                self.state.commit_index = from_index;
                self.state.last_applied = from_index;
                self.state.log.truncate(from_index);
            }
        }
        Ok(events)
    }

    fn permit(&self, allowed: &[Role], command: &NodeCommand) -> Result<(), NodeError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(NodeError::InvalidTransition {
                role: self.role,
                command: command.name(),
            })
        }
    }

    fn become_role(&mut self, to: Role, events: &mut Vec<NodeEvent>) {
        let from = self.role;
        if from != to {
            debug!(node_id = self.state.node_id, ?from, ?to, "role changed");
            self.role = to;
            events.push(NodeEvent::RoleChanged { from, to });
        }
    }

    fn set_leader(&mut self, leader_id: Option<NodeId>, events: &mut Vec<NodeEvent>) {
        if self.state.leader_id != leader_id {
            self.state.leader_id = leader_id;
            events.push(NodeEvent::LeaderChanged { leader_id });
        }
    }
}

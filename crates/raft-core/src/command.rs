//! # command
//!
//! why: close the set of things that may change a node's state
//! relations: consumed by node.rs's RaftNode::handle, published by raft-server's driver
//! what: NodeCommand enum, NodeEvent notifications

use serde::{Deserialize, Serialize};

use crate::node::{NodeId, Role};

/// Every state transition a node accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCommand {
    /// Found a new cluster with this node as its leader.
    CreateCluster,
    /// Join an existing cluster as a follower.
    JoinCluster,
    /// Adopt a term seen from another node. Must not move backward.
    SetNewTerm { term: u64 },
    /// The leader went quiet: start an election for the next term.
    TimeoutLeaderHeartbeat,
    WinCandidateElection,
    /// Abandon a running election in favour of a legitimate leader.
    CancelElection,
    /// Record the leader advertised for the current term.
    SetLeaderInformation { leader_id: NodeId },
    CommitEntry { term: u64, index: u64 },
    ApplyEntry { index: u64 },
    /// Drop the log suffix starting at `from_index`.
    TruncateLog { from_index: u64 },
}

impl NodeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NodeCommand::CreateCluster => "CreateCluster",
            NodeCommand::JoinCluster => "JoinCluster",
            NodeCommand::SetNewTerm { .. } => "SetNewTerm",
            NodeCommand::TimeoutLeaderHeartbeat => "TimeoutLeaderHeartbeat",
            NodeCommand::WinCandidateElection => "WinCandidateElection",
            NodeCommand::CancelElection => "CancelElection",
            NodeCommand::SetLeaderInformation { .. } => "SetLeaderInformation",
            NodeCommand::CommitEntry { .. } => "CommitEntry",
            NodeCommand::ApplyEntry { .. } => "ApplyEntry",
            NodeCommand::TruncateLog { .. } => "TruncateLog",
        }
    }
}

/// Notifications produced while handling a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    TermChanged { term: u64 },
    RoleChanged { from: Role, to: Role },
    LeaderChanged { leader_id: Option<NodeId> },
}

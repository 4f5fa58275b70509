//! # message
//!
//! why: define the raft rpc payloads exchanged between nodes
//! relations: answered by raft-server's RaftService, entries produced by codec.rs
//! what: RequestVote / AppendEntries requests and responses, RaftMessage envelope

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Invoked by candidates to gather votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// Invoked by the leader to replicate entries; doubles as a heartbeat when
/// `entries` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    /// Entries as encoded by `codec::encode`, in log order.
    pub entries: Vec<Bytes>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
}

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(RequestVoteRequest),
    VoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

//! # error
//!
//! why: give every rejected state transition and malformed entry a typed cause
//! relations: returned by node.rs (state machine guards), codec.rs (entry decoding) and config.rs
//! what: NodeError, CodecError, TimingError

use thiserror::Error;

use crate::node::Role;

/// Reasons the node state machine refuses a command.
///
/// A command that fails with any of these leaves the node state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The term must never move backward.
    #[error("term regression: current term is {current}, attempted to set {attempted}")]
    TermRegression { current: u64, attempted: u64 },

    /// An entry cannot be committed against a term the node has not reached.
    #[error("cannot commit entry {index} with term {entry_term} ahead of current term {current}")]
    CommitAheadOfTerm {
        index: u64,
        entry_term: u64,
        current: u64,
    },

    /// Truncation may only rewind over committed entries.
    #[error("cannot truncate from {from_index}: commit index is only {commit_index}")]
    TruncateAheadOfCommit { from_index: u64, commit_index: u64 },

    /// Log indices start at 1; index 0 is the pre-log sentinel.
    #[error("log index {0} is not a valid entry index")]
    InvalidLogIndex(u64),

    /// The command is not permitted in the node's current role.
    #[error("command {command} is not permitted while {role:?}")]
    InvalidTransition { role: Role, command: &'static str },
}

/// Failures while decoding an encoded log entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ended before the declared content did.
    #[error("truncated entry: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// The length prefix is not a valid base-128 varint.
    #[error("malformed length prefix")]
    BadLengthPrefix,

    /// The command type tag is not valid utf-8.
    #[error("command type tag is not valid utf-8")]
    InvalidCommandType,

    /// The entry body declared fewer bytes than its fields occupy.
    #[error("entry body has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// Election and heartbeat timings that cannot work together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimingError {
    #[error("election_timeout_min must be greater than zero")]
    ZeroElectionTimeout,

    #[error("election_timeout_min ({min}) exceeds election_timeout_max ({max})")]
    InvertedElectionTimeout { min: u64, max: u64 },

    /// A follower would time out before hearing a single heartbeat.
    #[error("heartbeat_interval ({heartbeat}) must be below election_timeout_min ({min})")]
    HeartbeatTooSlow { heartbeat: u64, min: u64 },
}

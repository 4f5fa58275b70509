//! # raft-core
//!
//! why: implement the core raft consensus state in pure, portable rust
//! relations: used by raft-storage for persistence, raft-server for the async runtime
//! what: node state machine, log index, entry codec, rpc message types

pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;

pub use command::{NodeCommand, NodeEvent};
pub use config::RaftConfig;
pub use error::{CodecError, NodeError, TimingError};
pub use log::{LogEntry, LogIndex};
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, RaftMessage, RequestVoteRequest,
    RequestVoteResponse,
};
pub use node::{NodeId, NodeSnapshot, NodeState, RaftNode, Role};

//! # error
//!
//! why: give every async component of the server a typed failure
//! relations: used by driver.rs, pipeline/, replication.rs, follower.rs, service.rs, server.rs
//! what: DriverError, PipelineError, ReplicationError, AppendError, ServiceError, ServerError

use std::io;

use raft_core::{CodecError, NodeError, NodeId};
use thiserror::Error;

use crate::command::CommandError;
use crate::config::ConfigError;
use crate::transport::TransportError;

/// failure publishing a command to the node driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Rejected(#[from] NodeError),

    #[error("node driver has shut down")]
    Shutdown,
}

/// reason a scheduled client command was dropped by the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("node is not the cluster leader (known leader: {leader_hint:?})")]
    NotLeader { leader_hint: Option<NodeId> },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("command reached {stage} before being encoded")]
    NotEncoded { stage: &'static str },

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error("entry {index} is out of sequence, next writable index is {expected}")]
    OutOfSequence { index: u64, expected: u64 },

    #[error("journal write failed: {0}")]
    Journal(#[source] io::Error),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("command pipeline has shut down")]
    Shutdown,
}

/// failure handing an encoded entry to the peer replication actors
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("no peers registered, a single-node cluster cannot replicate")]
    NoPeers,

    #[error("no replication actor accepted the entry")]
    Undeliverable,

    #[error("mailbox for peer {0} is full")]
    MailboxFull(NodeId),

    #[error("mailbox for peer {0} is closed")]
    MailboxClosed(NodeId),

    #[error("quorum not reached: {acks} of {required} acknowledgements, {failures} failures")]
    QuorumNotReached {
        acks: usize,
        failures: usize,
        required: usize,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// failure appending leader entries on a follower
#[derive(Debug, Error)]
pub enum AppendError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("entry index {found} does not follow {expected}")]
    Gap { expected: u64, found: u64 },

    #[error("journal write failed: {0}")]
    Journal(#[source] io::Error),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("follower log writer has shut down")]
    Shutdown,
}

/// fault raised while serving an inbound raft rpc
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("multiple leaders claim the current term, fault raised by node {node_id}")]
    MultipleLeaders { node_id: NodeId },

    #[error("node has not created or joined a cluster")]
    NotInCluster,

    #[error("{0} is a response and cannot be served")]
    UnexpectedMessage(&'static str),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// failure starting the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open or replay journal: {0}")]
    Journal(#[from] io::Error),

    #[error("journal replay produced an inconsistent log: {0}")]
    Restore(#[from] NodeError),
}

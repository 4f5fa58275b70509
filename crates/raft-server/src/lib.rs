//! # raft-server
//!
//! why: run a raft-core node on tokio with a journal, peers, and client commands
//! relations: drives raft-core's RaftNode, persists through raft-storage's Journal
//! what: node driver, command pipeline, replication actors, follower writer, election timer, rpc service

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod follower;
pub mod journal;
pub mod pipeline;
pub mod replication;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod timer;
pub mod transport;

pub use command::{ClientCommand, CommandContext, CommandError, JsonCommand};
pub use config::{ConfigError, PipelineConfig, ReplicationConfig, ServerConfig};
pub use driver::{NodeDriver, NodeHandle};
pub use error::{
    AppendError, DriverError, PipelineError, ReplicationError, ServerError, ServiceError,
};
pub use follower::{AppendEntriesRequested, FollowerLogWriter};
pub use journal::SharedJournal;
pub use pipeline::{
    CommandPipeline, CommandReceipt, CommittedEntry, PipelineMetrics, PipelineMetricsSnapshot,
    StageKind,
};
pub use replication::{ClusterEvent, QuorumTracker, ReplicateRequest, ReplicationActorSet};
pub use server::RaftServer;
pub use service::RaftService;
pub use telemetry::{init_logging, LogFormat};
pub use timer::{ElectionTimer, HeartbeatTimer};
pub use transport::{PeerInfo, PeerTransport, TransportError};

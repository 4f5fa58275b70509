//! # transport
//!
//! why: keep the network out of replication so tests and embedders can plug their own
//! relations: called by replication.rs's actors, one call per peer per entry
//! what: PeerInfo, PeerTransport trait, TransportError

use async_trait::async_trait;
use bytes::Bytes;
use raft_core::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cluster member other than this node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node_id: NodeId,
    pub address: String,
}

impl PeerInfo {
    pub fn new(node_id: NodeId, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("peer {peer} rejected the entry: {reason}")]
    Rejected { peer: NodeId, reason: String },
}

/// Delivers one encoded log entry to one peer.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn send(&self, peer: &PeerInfo, entry: Bytes) -> Result<(), TransportError>;
}

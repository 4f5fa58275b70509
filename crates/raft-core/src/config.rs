//! # config
//!
//! why: tune raft timing without recompiling
//! relations: embedded in raft-server's ServerConfig, read by the election timer
//! what: RaftConfig with election timeout range and heartbeat interval (milliseconds)

use serde::{Deserialize, Serialize};

use crate::error::TimingError;

/// Timing parameters for elections and heartbeats, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaftConfig {
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
        }
    }
}

impl RaftConfig {
    /// Reports the first inconsistency, if any.
    pub fn validate(&self) -> Result<(), TimingError> {
        if self.election_timeout_min == 0 {
            return Err(TimingError::ZeroElectionTimeout);
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(TimingError::InvertedElectionTimeout {
                min: self.election_timeout_min,
                max: self.election_timeout_max,
            });
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(TimingError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval,
                min: self.election_timeout_min,
            });
        }
        Ok(())
    }
}

//! # config
//!
//! why: describe a server node in a json file instead of code
//! relations: read by server.rs's RaftServer::start, embeds raft-core's RaftConfig
//! what: ServerConfig, PipelineConfig, ReplicationConfig, ConfigError

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use raft_core::{NodeId, RaftConfig, TimingError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{self, LogFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid raft timing: {0}")]
    Raft(#[from] TimingError),
}

/// Everything needed to start one server node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub node_id: NodeId,
    /// directory for the file journal; `None` keeps the journal in memory
    pub journal_path: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub replication: ReplicationConfig,
    pub raft: RaftConfig,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            journal_path: None,
            pipeline: PipelineConfig::default(),
            replication: ReplicationConfig::default(),
            raft: RaftConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// capacity of the submit queue and of each channel between stages
    pub buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicationConfig {
    /// pending entries a single peer actor may hold
    pub mailbox_capacity: usize,
    /// wait for a majority of acknowledgements before writing locally
    pub require_quorum: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            require_quorum: false,
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.replication.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "replication.mailbox_capacity must be greater than zero".to_string(),
            ));
        }
        self.raft.validate()?;
        Ok(())
    }

    /// `LOG_FORMAT` in the environment wins over the configured format.
    pub fn resolved_log_format(&self) -> LogFormat {
        LogFormat::from_env().unwrap_or(self.log_format)
    }

    /// Install the global tracing subscriber in this node's log format.
    pub fn init_logging(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        telemetry::init_logging(self.resolved_log_format())
    }
}

//! # command
//!
//! why: let applications define what a replicated entry means
//! relations: submitted to pipeline/'s CommandPipeline, executed by pipeline/stages.rs's LogWriter
//! what: ClientCommand trait, CommandContext, JsonCommand adapter, CommandError

use bytes::Bytes;
use raft_core::NodeId;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to serialize command payload: {0}")]
    Serialize(String),

    #[error("command execution failed: {0}")]
    Execution(String),
}

/// Where a command landed in the log when it is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContext {
    pub node_id: NodeId,
    pub term: u64,
    pub index: u64,
}

/// A client operation carried through the log.
///
/// `command_type` and `payload` become the entry body; `execute` runs on the
/// leader once the entry is durably written.
pub trait ClientCommand: Send + Sync + 'static {
    fn command_type(&self) -> &str;

    fn payload(&self) -> Result<Bytes, CommandError>;

    fn execute(&self, context: &CommandContext) -> Result<(), CommandError>;
}

type Handler<T> = Box<dyn Fn(&T, &CommandContext) -> Result<(), CommandError> + Send + Sync>;

/// Command whose payload is the json form of `T`.
pub struct JsonCommand<T> {
    command_type: String,
    value: T,
    handler: Option<Handler<T>>,
}

impl<T> JsonCommand<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new(command_type: impl Into<String>, value: T) -> Self {
        Self {
            command_type: command_type.into(),
            value,
            handler: None,
        }
    }

    /// run `handler` when the command executes
    pub fn on_execute<F>(mut self, handler: F) -> Self
    where
        F: Fn(&T, &CommandContext) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> ClientCommand for JsonCommand<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn command_type(&self) -> &str {
        &self.command_type
    }

    fn payload(&self) -> Result<Bytes, CommandError> {
        serde_json::to_vec(&self.value)
            .map(Bytes::from)
            .map_err(|e| CommandError::Serialize(e.to_string()))
    }

    fn execute(&self, context: &CommandContext) -> Result<(), CommandError> {
        match &self.handler {
            Some(handler) => handler(&self.value, context),
            None => Ok(()),
        }
    }
}

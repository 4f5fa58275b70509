//! # event
//!
//! why: carry one client command and its growing log entry through the stages
//! relations: created by pipeline/mod.rs's submit, filled in by stages.rs
//! what: ScheduledCommandEvent, CommittedEntry, completion signalling

use bytes::Bytes;
use raft_core::LogEntry;
use tokio::sync::oneshot;

use crate::command::ClientCommand;
use crate::error::PipelineError;

/// Where an executed command was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedEntry {
    pub term: u64,
    pub index: u64,
}

pub(crate) type Completion = oneshot::Sender<Result<CommittedEntry, PipelineError>>;

/// A client command in flight.
///
/// Moved between stages as a `Box`, so exactly one stage owns it at a time.
pub struct ScheduledCommandEvent {
    sequence: u64,
    command: Box<dyn ClientCommand>,
    log_entry: Option<LogEntry>,
    encoded_entry: Option<Bytes>,
    /// cursor epoch the index was allocated in
    epoch: u64,
    completion: Option<Completion>,
}

impl ScheduledCommandEvent {
    pub(crate) fn new(
        sequence: u64,
        command: Box<dyn ClientCommand>,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            sequence,
            command,
            log_entry: None,
            encoded_entry: None,
            epoch: 0,
            completion,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn command(&self) -> &dyn ClientCommand {
        self.command.as_ref()
    }

    pub fn log_entry(&self) -> Option<&LogEntry> {
        self.log_entry.as_ref()
    }

    pub fn encoded_entry(&self) -> Option<&Bytes> {
        self.encoded_entry.as_ref()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn set_log_entry(&mut self, entry: LogEntry, encoded: Bytes, epoch: u64) {
        self.log_entry = Some(entry);
        self.encoded_entry = Some(encoded);
        self.epoch = epoch;
    }

    /// release the submitter with the event's final outcome
    pub(crate) fn complete(&mut self, result: Result<CommittedEntry, PipelineError>) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(result);
        }
    }

    pub(crate) fn committed(&self) -> Option<CommittedEntry> {
        self.log_entry.as_ref().map(|entry| CommittedEntry {
            term: entry.term,
            index: entry.index,
        })
    }
}

impl std::fmt::Debug for ScheduledCommandEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledCommandEvent")
            .field("sequence", &self.sequence)
            .field("command_type", &self.command.command_type())
            .field("log_entry", &self.log_entry)
            .finish()
    }
}

//! # log
//!
//! why: track which term every committed log position belongs to
//! relations: owned by node.rs, entries encoded by codec.rs and persisted via raft-storage
//! what: LogEntry struct, LogIndex term-per-index table used for the log matching check

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Slots are allocated in blocks of this many entries.
const LOG_INCREMENT_SIZE: usize = 64;

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// Type tag naming the command carried by this entry
    pub command_type: String,
    /// The command to be applied to the state machine
    pub command: Bytes,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(
        term: u64,
        index: u64,
        command_type: impl Into<String>,
        command: impl Into<Bytes>,
    ) -> Self {
        Self {
            term,
            index,
            command_type: command_type.into(),
            command: command.into(),
        }
    }
}

/// In-memory map from log index to the term of the entry stored there.
///
/// The log itself lives in the journal; this table is rebuilt on startup by
/// replaying it. Index 0 is the pre-log baseline and always has term 0.
#[derive(Debug, Clone)]
pub struct LogIndex {
    slots: Vec<Option<u64>>,
}

impl Default for LogIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LogIndex {
    pub fn new() -> Self {
        Self {
            slots: vec![None; LOG_INCREMENT_SIZE],
        }
    }

    /// Term stored at `index`, or `None` when nothing is known about it.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        let slot = usize::try_from(index - 1).ok()?;
        self.slots.get(slot).copied().flatten()
    }

    /// Record `term` at `index`, growing the table as needed.
    pub fn set(&mut self, index: u64, term: u64) -> Result<(), NodeError> {
        if index == 0 {
            return Err(NodeError::InvalidLogIndex(index));
        }
        let slot = usize::try_from(index - 1).map_err(|_| NodeError::InvalidLogIndex(index))?;
        if slot >= self.slots.len() {
            let blocks = slot / LOG_INCREMENT_SIZE + 1;
            self.slots.resize(blocks * LOG_INCREMENT_SIZE, None);
        }
        self.slots[slot] = Some(term);
        Ok(())
    }

    /// Forget every slot at and after `from_index`.
    pub fn truncate(&mut self, from_index: u64) {
        let start = usize::try_from(from_index.saturating_sub(1)).unwrap_or(usize::MAX);
        for slot in self.slots.iter_mut().skip(start) {
            *slot = None;
        }
    }

    /// Highest index with a known term, 0 when the log is empty.
    pub fn last_index(&self) -> u64 {
        self.slots
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |slot| slot as u64 + 1)
    }

    /// Term of the highest known entry, 0 when the log is empty.
    pub fn last_term(&self) -> u64 {
        self.term_at(self.last_index()).unwrap_or(0)
    }
}

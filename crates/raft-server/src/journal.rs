//! # journal
//!
//! why: let async tasks share one blocking journal without stalling the runtime
//! relations: wraps raft-storage's Journal, written by pipeline/stages.rs, follower.rs and driver.rs
//! what: SharedJournal, async writes on the blocking pool, sync replay at startup

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use raft_core::{LogEntry, NodeId};
use raft_storage::{replay, Journal};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Cloneable handle on a single journal.
///
/// Writers are serialized by the mutex; each write runs on tokio's blocking
/// pool.
///
/// The log lock is coarser: a log writer holds it from its index check until
/// the entry is committed on the node, so the leader's write stage and the
/// follower writer never interleave on the same index.
#[derive(Clone)]
pub struct SharedJournal {
    inner: Arc<Mutex<Box<dyn Journal>>>,
    log: Arc<AsyncMutex<()>>,
}

impl SharedJournal {
    pub fn new(journal: impl Journal + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(journal))),
            log: Arc::new(AsyncMutex::new(())),
        }
    }

    pub async fn lock_log(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.log).lock_owned().await
    }

    pub async fn write_block(&self, block: Bytes) -> io::Result<()> {
        self.blocking(move |journal| journal.write_block(&block))
            .await
    }

    pub async fn truncate_from(&self, from_index: u64) -> io::Result<()> {
        self.blocking(move |journal| journal.truncate_from(from_index))
            .await
    }

    pub async fn save_term_and_vote(&self, term: u64, voted_for: Option<NodeId>) -> io::Result<()> {
        self.blocking(move |journal| journal.save_term_and_vote(term, voted_for))
            .await
    }

    /// decode every block; only meant for startup, before tasks are spawned
    pub fn replay(&self) -> io::Result<Vec<LogEntry>> {
        let journal = self.inner.lock();
        replay(&**journal)
    }

    pub fn load_term_and_vote(&self) -> io::Result<(u64, Option<NodeId>)> {
        self.inner.lock().load_term_and_vote()
    }

    async fn blocking<F>(&self, op: F) -> io::Result<()>
    where
        F: FnOnce(&mut dyn Journal) -> io::Result<()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut journal = inner.lock();
            op(&mut **journal)
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::codec;
    use raft_storage::InMemoryJournal;

    #[tokio::test]
    async fn writes_are_visible_to_replay() {
        let journal = SharedJournal::new(InMemoryJournal::new());
        for index in 1..=3 {
            let entry = LogEntry::new(1, index, "set", vec![index as u8]);
            journal.write_block(codec::encode(&entry)).await.unwrap();
        }
        journal.truncate_from(3).await.unwrap();
        journal.save_term_and_vote(1, Some(2)).await.unwrap();

        let entries = journal.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].index, 2);
        assert_eq!(journal.load_term_and_vote().unwrap(), (1, Some(2)));
    }

    #[tokio::test]
    async fn log_lock_is_shared_between_clones() {
        let journal = SharedJournal::new(InMemoryJournal::new());
        let other = journal.clone();
        let held = journal.lock_log().await;
        assert!(other.log.try_lock().is_err());
        drop(held);
        assert!(other.log.try_lock().is_ok());
    }
}

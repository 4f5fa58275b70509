//! # follower
//!
//! why: append a leader's entries on a follower one request at a time
//! relations: fed by service.rs's append_entries, writes through journal.rs and driver.rs
//! what: AppendEntriesRequested, FollowerLogWriter task

use bytes::Bytes;
use raft_core::{codec, NodeCommand};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::NodeHandle;
use crate::error::AppendError;
use crate::journal::SharedJournal;

/// Entries accepted by the consistency check, still encoded as sent.
#[derive(Debug, Clone)]
pub struct AppendEntriesRequested {
    pub prev_log_index: u64,
    pub leader_commit: u64,
    pub entries: Vec<Bytes>,
}

type AppendReply = oneshot::Sender<Result<u64, AppendError>>;

/// Cloneable handle on the follower's single append task.
#[derive(Clone)]
pub struct FollowerLogWriter {
    requests: mpsc::Sender<(AppendEntriesRequested, AppendReply)>,
}

impl FollowerLogWriter {
    pub fn spawn(
        node: NodeHandle,
        journal: SharedJournal,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (requests, inbox) = mpsc::channel(capacity);
        let task = tokio::spawn(run(node, journal, inbox));
        (Self { requests }, task)
    }

    /// Append the request's entries; returns the index of the last one.
    pub async fn append(&self, request: AppendEntriesRequested) -> Result<u64, AppendError> {
        let (reply, done) = oneshot::channel();
        self.requests
            .send((request, reply))
            .await
            .map_err(|_| AppendError::Shutdown)?;
        done.await.map_err(|_| AppendError::Shutdown)?
    }
}

async fn run(
    node: NodeHandle,
    journal: SharedJournal,
    mut inbox: mpsc::Receiver<(AppendEntriesRequested, AppendReply)>,
) {
    while let Some((request, reply)) = inbox.recv().await {
        let result = append(&node, &journal, request).await;
        if let Err(err) = &result {
            warn!(%err, "follower append failed");
        }
        let _ = reply.send(result);
    }
    debug!("follower log writer stopped");
}

/// Entries must follow `prev_log_index` without gaps. An entry already held
/// with the same term is skipped; one held with a different term truncates
/// the local log from there.
async fn append(
    node: &NodeHandle,
    journal: &SharedJournal,
    request: AppendEntriesRequested,
) -> Result<u64, AppendError> {
    let _log = journal.lock_log().await;
    let mut expected = request.prev_log_index + 1;
    for block in request.entries {
        let entry = codec::decode(&block)?;
        if entry.index != expected {
            return Err(AppendError::Gap {
                expected,
                found: entry.index,
            });
        }
        match node.term_at(entry.index) {
            Some(term) if term == entry.term => {
                expected += 1;
                continue;
            }
            Some(term) => {
                info!(
                    index = entry.index,
                    local_term = term,
                    leader_term = entry.term,
                    "conflicting entry, truncating local log"
                );
                journal
                    .truncate_from(entry.index)
                    .await
                    .map_err(AppendError::Journal)?;
                node.publish(NodeCommand::TruncateLog {
                    from_index: entry.index,
                })
                .await?;
            }
            None => {}
        }
        journal
            .write_block(block)
            .await
            .map_err(AppendError::Journal)?;
        node.publish(NodeCommand::CommitEntry {
            term: entry.term,
            index: entry.index,
        })
        .await?;
        expected += 1;
    }
    debug!(
        last_index = expected - 1,
        leader_commit = request.leader_commit,
        "appended leader entries"
    );
    Ok(expected - 1)
}

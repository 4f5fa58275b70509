//! # timer
//!
//! why: notice a silent leader and start an election
//! relations: reset by service.rs on valid AppendEntries, publishes through driver.rs
//! what: ElectionTimer trait, HeartbeatTimer with randomized timeouts

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use raft_core::{NodeCommand, RaftConfig, Role};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::NodeHandle;
use crate::error::DriverError;

/// Something that can be told the leader is alive.
pub trait ElectionTimer: Send + Sync {
    fn reset_timer(&self);
}

/// Fires `TimeoutLeaderHeartbeat` when no reset arrives within a random
/// timeout drawn from the configured election range.
///
/// Leaders and uninitialised nodes ignore the timeout.
pub struct HeartbeatTimer {
    reset: Arc<Notify>,
    task: JoinHandle<()>,
}

impl HeartbeatTimer {
    pub fn spawn(config: &RaftConfig, node: NodeHandle) -> Self {
        let reset = Arc::new(Notify::new());
        let task = tokio::spawn(run(
            config.election_timeout_min,
            config.election_timeout_max,
            node,
            Arc::clone(&reset),
        ));
        Self { reset, task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl ElectionTimer for HeartbeatTimer {
    fn reset_timer(&self) {
        self.reset.notify_one();
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn random_timeout(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

async fn run(min_ms: u64, max_ms: u64, node: NodeHandle, reset: Arc<Notify>) {
    loop {
        let timeout = random_timeout(min_ms, max_ms);
        tokio::select! {
            _ = reset.notified() => continue,
            _ = tokio::time::sleep(timeout) => {}
        }
        if !matches!(node.role(), Role::Follower | Role::Candidate) {
            continue;
        }
        info!(
            term = node.current_term(),
            timeout_ms = timeout.as_millis() as u64,
            "leader heartbeat timed out, starting election"
        );
        match node.publish(NodeCommand::TimeoutLeaderHeartbeat).await {
            Ok(()) => {}
            Err(DriverError::Shutdown) => break,
            Err(err) => warn!(%err, "election timeout rejected"),
        }
    }
    debug!("election timer stopped");
}

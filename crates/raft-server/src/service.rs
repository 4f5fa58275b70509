//! # service
//!
//! why: answer the two raft rpcs a peer can send this node
//! relations: drives driver.rs, resets timer.rs, hands entries to follower.rs
//! what: RaftService with request_vote, append_entries, and RaftMessage dispatch

use std::sync::Arc;

use raft_core::{
    AppendEntriesRequest, AppendEntriesResponse, NodeCommand, RaftMessage, RequestVoteRequest,
    RequestVoteResponse, Role,
};
use tracing::{debug, error, info, warn};

use crate::driver::NodeHandle;
use crate::error::ServiceError;
use crate::follower::{AppendEntriesRequested, FollowerLogWriter};
use crate::timer::ElectionTimer;

pub struct RaftService {
    node: NodeHandle,
    timer: Arc<dyn ElectionTimer>,
    follower: FollowerLogWriter,
}

impl RaftService {
    pub fn new(
        node: NodeHandle,
        timer: Arc<dyn ElectionTimer>,
        follower: FollowerLogWriter,
    ) -> Self {
        Self {
            node,
            timer,
            follower,
        }
    }

    /// Votes are never granted. A request from a later term still moves
    /// this node to that term.
    pub async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, ServiceError> {
        let current = self.node.current_term();
        if request.term > current {
            debug!(
                candidate = request.candidate_id,
                term = request.term,
                "adopting candidate term"
            );
            self.node
                .publish(NodeCommand::SetNewTerm { term: request.term })
                .await?;
        }
        Ok(RequestVoteResponse {
            term: self.node.current_term(),
            vote_granted: false,
        })
    }

    /// Only a follower takes entries. A node that never created or joined a
    /// cluster answers `NotInCluster` rather than the multiple-leaders fault
    /// raised for a leader or an unyielding candidate, so operators can tell
    /// a misrouted request from a split brain.
    pub async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, ServiceError> {
        let current = self.node.current_term();
        if request.term < current {
            warn!(
                leader = request.leader_id,
                term = request.term,
                current,
                "rejecting append entries from stale term"
            );
            return Ok(self.append_response(false));
        }

        self.timer.reset_timer();
        if request.term > current {
            self.node
                .publish(NodeCommand::SetNewTerm { term: request.term })
                .await?;
        }
        if self.node.role() == Role::Candidate {
            info!(leader = request.leader_id, "leader found, cancelling election");
            self.node.publish(NodeCommand::CancelElection).await?;
        }
        match self.node.role() {
            Role::Follower => {}
            Role::Initial => return Err(ServiceError::NotInCluster),
            Role::Candidate | Role::Leader => {
                let node_id = self.node.node_id();
                error!(
                    node_id,
                    leader = request.leader_id,
                    term = request.term,
                    "another leader claims this term"
                );
                return Err(ServiceError::MultipleLeaders { node_id });
            }
        }

        if self.node.term_at(request.prev_log_index) != Some(request.prev_log_term) {
            info!(
                prev_log_index = request.prev_log_index,
                prev_log_term = request.prev_log_term,
                "log does not match leader at previous index"
            );
            return Ok(self.append_response(false));
        }

        self.node
            .publish(NodeCommand::SetLeaderInformation {
                leader_id: request.leader_id,
            })
            .await?;

        if request.entries.is_empty() {
            return Ok(self.append_response(true));
        }
        let appended = self
            .follower
            .append(AppendEntriesRequested {
                prev_log_index: request.prev_log_index,
                leader_commit: request.leader_commit,
                entries: request.entries,
            })
            .await;
        match appended {
            Ok(_) => Ok(self.append_response(true)),
            Err(err) => {
                warn!(%err, "failed to append leader entries");
                Ok(self.append_response(false))
            }
        }
    }

    /// Serve a request message and wrap the reply.
    pub async fn dispatch(&self, message: RaftMessage) -> Result<RaftMessage, ServiceError> {
        match message {
            RaftMessage::VoteRequest(request) => self
                .request_vote(request)
                .await
                .map(RaftMessage::VoteResponse),
            RaftMessage::AppendEntries(request) => self
                .append_entries(request)
                .await
                .map(RaftMessage::AppendEntriesResponse),
            RaftMessage::VoteResponse(_) => Err(ServiceError::UnexpectedMessage("VoteResponse")),
            RaftMessage::AppendEntriesResponse(_) => {
                Err(ServiceError::UnexpectedMessage("AppendEntriesResponse"))
            }
        }
    }

    fn append_response(&self, success: bool) -> AppendEntriesResponse {
        AppendEntriesResponse {
            term: self.node.current_term(),
            success,
        }
    }
}

//! # comprehensive raft-core tests
//!
//! why: verify the node state machine keeps its invariants under every command
//! relations: tests raft-core crate
//! what: transitions, term/commit monotonicity, log index, truncation, codec scenarios

use raft_core::{codec, LogEntry, LogIndex, NodeCommand, NodeError, NodeEvent, RaftNode, Role};

fn follower(id: u64) -> RaftNode {
    let mut node = RaftNode::new(id);
    node.handle(NodeCommand::JoinCluster).unwrap();
    node
}

fn leader(id: u64) -> RaftNode {
    let mut node = RaftNode::new(id);
    node.handle(NodeCommand::CreateCluster).unwrap();
    node
}

// =============================================================================
// SECTION 1: ROLE TRANSITIONS
// =============================================================================

mod transitions {
    use super::*;

    #[test]
    fn join_cluster_becomes_follower() {
        let mut node = RaftNode::new(1);
        let events = node.handle(NodeCommand::JoinCluster).unwrap();
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(
            events,
            vec![NodeEvent::RoleChanged {
                from: Role::Initial,
                to: Role::Follower
            }]
        );
    }

    #[test]
    fn create_cluster_becomes_leader_of_itself() {
        let node = leader(7);
        assert_eq!(node.role(), Role::Leader);
        assert_eq!(node.state().leader_id(), Some(7));
    }

    #[test]
    fn bootstrap_only_from_initial() {
        let mut node = follower(1);
        let err = node.handle(NodeCommand::CreateCluster).unwrap_err();
        assert_eq!(
            err,
            NodeError::InvalidTransition {
                role: Role::Follower,
                command: "CreateCluster"
            }
        );
    }

    #[test]
    fn heartbeat_timeout_starts_candidacy() {
        let mut node = follower(1);
        node.handle(NodeCommand::SetNewTerm { term: 5 }).unwrap();

        let events = node.handle(NodeCommand::TimeoutLeaderHeartbeat).unwrap();

        assert_eq!(node.role(), Role::Candidate);
        assert_eq!(node.state().current_term(), 6);
        assert_eq!(node.state().voted_for(), Some(1));
        assert!(events.contains(&NodeEvent::TermChanged { term: 6 }));
    }

    #[test]
    fn candidate_timeout_restarts_election() {
        let mut node = follower(1);
        node.handle(NodeCommand::TimeoutLeaderHeartbeat).unwrap();
        node.handle(NodeCommand::TimeoutLeaderHeartbeat).unwrap();
        assert_eq!(node.role(), Role::Candidate);
        assert_eq!(node.state().current_term(), 2);
    }

    #[test]
    fn leader_ignores_heartbeat_timeout() {
        let mut node = leader(1);
        assert!(node.handle(NodeCommand::TimeoutLeaderHeartbeat).is_err());
        assert_eq!(node.state().current_term(), 0);
    }

    #[test]
    fn candidate_wins_election() {
        let mut node = follower(3);
        node.handle(NodeCommand::TimeoutLeaderHeartbeat).unwrap();
        node.handle(NodeCommand::WinCandidateElection).unwrap();
        assert_eq!(node.role(), Role::Leader);
        assert_eq!(node.state().leader_id(), Some(3));
    }

    #[test]
    fn follower_cannot_win_election() {
        let mut node = follower(3);
        assert!(node.handle(NodeCommand::WinCandidateElection).is_err());
        assert_eq!(node.role(), Role::Follower);
    }

    #[test]
    fn cancel_election_steps_down() {
        let mut node = follower(1);
        node.handle(NodeCommand::TimeoutLeaderHeartbeat).unwrap();
        node.handle(NodeCommand::CancelElection).unwrap();
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.state().current_term(), 1);
    }

    #[test]
    fn higher_term_demotes_leader() {
        let mut node = leader(1);
        node.handle(NodeCommand::SetNewTerm { term: 2 }).unwrap();
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.state().leader_id(), None);
    }

    #[test]
    fn set_leader_information_keeps_role() {
        let mut node = follower(1);
        let events = node
            .handle(NodeCommand::SetLeaderInformation { leader_id: 4 })
            .unwrap();
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.state().leader_id(), Some(4));
        assert_eq!(events, vec![NodeEvent::LeaderChanged { leader_id: Some(4) }]);
    }
}

// =============================================================================
// SECTION 2: TERM MONOTONICITY
// =============================================================================

mod terms {
    use super::*;

    #[test]
    fn term_never_decreases() {
        let mut node = follower(1);
        let mut last = 0;
        for term in [1, 3, 2, 3, 0, 8, 7, 9] {
            let result = node.handle(NodeCommand::SetNewTerm { term });
            assert_eq!(result.is_ok(), term >= last);
            assert!(node.state().current_term() >= last);
            last = node.state().current_term();
        }
        assert_eq!(node.state().current_term(), 9);
    }

    #[test]
    fn new_term_emits_notification_and_resets_vote() {
        let mut node = follower(1);
        node.handle(NodeCommand::TimeoutLeaderHeartbeat).unwrap();
        assert_eq!(node.state().voted_for(), Some(1));

        let events = node.handle(NodeCommand::SetNewTerm { term: 4 }).unwrap();

        assert!(events.contains(&NodeEvent::TermChanged { term: 4 }));
        assert_eq!(node.state().voted_for(), None);
    }

    #[test]
    fn same_term_is_reannounced_and_clears_vote() {
        let mut node = follower(1);
        node.handle(NodeCommand::TimeoutLeaderHeartbeat).unwrap();
        node.handle(NodeCommand::WinCandidateElection).unwrap();
        assert_eq!(node.state().voted_for(), Some(1));

        let events = node.handle(NodeCommand::SetNewTerm { term: 1 }).unwrap();

        assert_eq!(events, vec![NodeEvent::TermChanged { term: 1 }]);
        assert_eq!(node.state().voted_for(), None);
        assert_eq!(node.role(), Role::Leader);
        assert_eq!(node.state().leader_id(), Some(1));
    }
}

// =============================================================================
// SECTION 3: COMMIT / APPLY
// =============================================================================

mod commit {
    use super::*;

    #[test]
    fn commit_and_apply_are_monotonic() {
        let mut node = follower(1);
        node.handle(NodeCommand::SetNewTerm { term: 3 }).unwrap();

        for index in [1, 2, 5, 3, 4] {
            let before = node.state().commit_index();
            node.handle(NodeCommand::CommitEntry { term: 3, index }).unwrap();
            assert!(node.state().commit_index() >= before);
        }
        assert_eq!(node.state().commit_index(), 5);

        for index in [2, 1, 4, 3] {
            let before = node.state().last_applied();
            node.handle(NodeCommand::ApplyEntry { index }).unwrap();
            assert!(node.state().last_applied() >= before);
        }
        assert_eq!(node.state().last_applied(), 4);
    }

    #[test]
    fn commit_records_term_in_log() {
        let mut node = follower(1);
        node.handle(NodeCommand::SetNewTerm { term: 2 }).unwrap();
        node.handle(NodeCommand::CommitEntry { term: 1, index: 1 }).unwrap();
        node.handle(NodeCommand::CommitEntry { term: 2, index: 2 }).unwrap();
        assert_eq!(node.state().log().term_at(1), Some(1));
        assert_eq!(node.state().log().term_at(2), Some(2));
    }

    #[test]
    fn cannot_commit_ahead_of_current_term() {
        let mut node = follower(1);
        node.handle(NodeCommand::SetNewTerm { term: 2 }).unwrap();
        let before = node.snapshot();

        let err = node
            .handle(NodeCommand::CommitEntry { term: 3, index: 1 })
            .unwrap_err();

        assert!(matches!(err, NodeError::CommitAheadOfTerm { .. }));
        assert_eq!(node.snapshot(), before);
        assert_eq!(node.state().log().term_at(1), None);
    }

    #[test]
    fn commit_at_sentinel_index_is_rejected() {
        let mut node = follower(1);
        let err = node
            .handle(NodeCommand::CommitEntry { term: 0, index: 0 })
            .unwrap_err();
        assert_eq!(err, NodeError::InvalidLogIndex(0));
        assert_eq!(node.state().commit_index(), 0);
    }
}

// =============================================================================
// SECTION 4: TRUNCATION
// =============================================================================

mod truncation {
    use super::*;

    fn node_with_log(len: u64) -> RaftNode {
        let mut node = follower(1);
        node.handle(NodeCommand::SetNewTerm { term: 1 }).unwrap();
        for index in 1..=len {
            node.handle(NodeCommand::CommitEntry { term: 1, index }).unwrap();
            node.handle(NodeCommand::ApplyEntry { index }).unwrap();
        }
        node
    }

    #[test]
    fn truncate_rewinds_commit_and_applied() {
        let mut node = node_with_log(6);
        node.handle(NodeCommand::TruncateLog { from_index: 3 }).unwrap();

        assert_eq!(node.state().commit_index(), 3);
        assert_eq!(node.state().last_applied(), 3);
        for index in 3..=6 {
            assert_eq!(node.state().log().term_at(index), None);
        }
        assert_eq!(node.state().log().term_at(2), Some(1));
    }

    #[test]
    fn cannot_truncate_beyond_commit_index() {
        let mut node = node_with_log(2);
        let err = node
            .handle(NodeCommand::TruncateLog { from_index: 3 })
            .unwrap_err();
        assert_eq!(
            err,
            NodeError::TruncateAheadOfCommit {
                from_index: 3,
                commit_index: 2
            }
        );
        assert_eq!(node.state().log().term_at(2), Some(1));
    }

    #[test]
    fn entry_can_be_recommitted_after_truncation() {
        let mut node = node_with_log(3);
        node.handle(NodeCommand::SetNewTerm { term: 2 }).unwrap();
        node.handle(NodeCommand::TruncateLog { from_index: 2 }).unwrap();
        node.handle(NodeCommand::CommitEntry { term: 2, index: 2 }).unwrap();
        assert_eq!(node.state().log().term_at(2), Some(2));
        assert_eq!(node.state().log().term_at(3), None);
        assert_eq!(node.state().commit_index(), 2);
    }
}

// =============================================================================
// SECTION 5: LOG INDEX AND CODEC
// =============================================================================

mod log_index {
    use super::*;

    #[test]
    fn set_then_lookup_round_trip() {
        let mut log = LogIndex::new();
        let writes = [(1, 1), (2, 1), (3, 2), (70, 5), (130, 6)];
        for (index, term) in writes {
            log.set(index, term).unwrap();
        }
        for (index, term) in writes {
            assert_eq!(log.term_at(index), Some(term));
        }
        assert_eq!(log.term_at(4), None);
        assert_eq!(log.term_at(10_000), None);
        assert_eq!(log.term_at(0), Some(0));
    }

    #[test]
    fn encoded_entry_survives_decode() {
        let entry = LogEntry::new(5, 3, "kv.put", b"k=v".to_vec());
        let encoded = codec::encode(&entry);
        assert_eq!(codec::decode(&encoded).unwrap(), entry);
    }
}

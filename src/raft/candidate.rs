use std::sync::Arc;

use tokio::task::JoinSet;

use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::node::{RaftEvent, RaftShared};
use crate::raft::role::RoleDelegate;
use crate::raft::task_group::TaskGroup;
use crate::raft::timer::ElectionTimer;
use crate::raft::RaftRole;

/// Campaigns for leadership in the term started on entry.
///
/// The term was already bumped and the self-vote cast by the transition into
/// this role. If the election neither wins nor loses before the timer fires,
/// the node re-enters candidacy with a fresh term.
pub(crate) struct Candidate {
    shared: Arc<RaftShared>,
    election: TaskGroup,
    timer: ElectionTimer,
}

impl Candidate {
    pub fn new(shared: Arc<RaftShared>) -> Self {
        Self {
            shared,
            election: TaskGroup::new(),
            timer: ElectionTimer::new(),
        }
    }
}

#[tonic::async_trait]
impl RoleDelegate for Candidate {
    fn role(&self) -> RaftRole {
        RaftRole::Candidate
    }

    async fn on(&mut self) {
        let request = VoteRequest {
            term: self.shared.current_term(),
            candidate_id: self.shared.id,
            last_log_index: self.shared.log.last_index(),
            last_log_term: self.shared.log.last_term(),
        };
        self.election
            .spawn(run_election(self.shared.clone(), request));
        self.timer.start(self.shared.clone());
    }

    async fn off(&mut self) {
        self.election.cancel().await;
        self.timer.stop().await;
    }

    fn delegate_append_entries(&self, _req: &AppendEntriesRequest) -> AppendEntriesResponse {
        // Requests at our own term made us step down before reaching here
        AppendEntriesResponse {
            term: self.shared.current_term(),
            success: false,
            match_index: self.shared.log.last_index(),
        }
    }

    fn delegate_request_vote(&self, _req: &VoteRequest) -> VoteResponse {
        // Our vote for this term went to ourselves
        VoteResponse {
            term: self.shared.current_term(),
            vote_granted: false,
        }
    }
}

/// Request votes from every peer in parallel and report the outcome to the
/// event loop. Dropping the future aborts any vote RPC still in flight.
async fn run_election(shared: Arc<RaftShared>, request: VoteRequest) {
    let term = request.term;
    let cluster = shared.messenger.cluster_set();
    let majority = cluster.majority();
    let mut votes = 1usize; // Vote for self

    tracing::info!(
        node_id = shared.id,
        term,
        last_log_index = request.last_log_index,
        last_log_term = request.last_log_term,
        "Requesting votes"
    );

    if votes >= majority {
        tracing::info!(node_id = shared.id, term, votes, "Won election");
        shared.notify(RaftEvent::ElectionWon { term }).await;
        return;
    }

    let mut ballots = JoinSet::new();
    for peer in cluster.peers() {
        let peer = peer.clone();
        let messenger = shared.messenger.clone();
        let request = request.clone();
        ballots.spawn(async move {
            let result = messenger.dispatch_request_vote(&peer, request).await;
            (peer.id(), result)
        });
    }

    while let Some(joined) = ballots.join_next().await {
        let (peer_id, result) = match joined {
            Ok(ballot) => ballot,
            Err(e) => {
                tracing::error!(node_id = shared.id, error = %e, "Vote request task failed");
                continue;
            }
        };

        match result {
            Ok(resp) if resp.term > term => {
                tracing::info!(
                    node_id = shared.id,
                    term,
                    peer_id,
                    peer_term = resp.term,
                    "Peer has higher term, abandoning election"
                );
                shared
                    .notify(RaftEvent::HigherTermObserved { term: resp.term })
                    .await;
                return;
            }
            Ok(resp) if resp.vote_granted => {
                votes += 1;
                tracing::debug!(node_id = shared.id, peer_id, votes, "Received vote");
                if votes >= majority {
                    tracing::info!(node_id = shared.id, term, votes, "Won election");
                    shared.notify(RaftEvent::ElectionWon { term }).await;
                    return;
                }
            }
            Ok(_) => {
                tracing::debug!(node_id = shared.id, peer_id, term, "Vote denied");
            }
            Err(e) => {
                tracing::debug!(node_id = shared.id, peer_id, error = %e, "Vote request failed");
            }
        }
    }

    tracing::debug!(
        node_id = shared.id,
        term,
        votes,
        needed = majority,
        "Election failed, not enough votes"
    );
}

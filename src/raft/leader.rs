use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cluster::ClusterSet;
use crate::error::{QuorumError, Result};
use crate::log::{Entry, LogChangeReason, Payload, RaftLog};
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::node::{Proposal, RaftShared};
use crate::raft::replication::Replicator;
use crate::raft::role::RoleDelegate;
use crate::raft::RaftRole;

/// Bookkeeping for one leadership term.
///
/// Built fresh on every accession and dropped on exit; never reused across
/// terms.
#[derive(Debug)]
pub struct LeaderContext {
    pub term: u64,
    pub leader_id: u64,
    /// Membership at accession
    pub members: ClusterSet,
    /// Log's last index just before the leader's no-op
    pub last_index_at_accession: u64,
    match_index: Mutex<HashMap<u64, u64>>,
}

impl LeaderContext {
    pub fn new(
        term: u64,
        leader_id: u64,
        members: ClusterSet,
        last_index_at_accession: u64,
    ) -> Self {
        Self {
            term,
            leader_id,
            members,
            last_index_at_accession,
            match_index: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `peer_id` holds the leader's log up to `index`. Match
    /// indices only move forward. Returns whether this one advanced.
    pub fn record_match(&self, peer_id: u64, index: u64) -> bool {
        let mut matches = self
            .match_index
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = matches.entry(peer_id).or_insert(0);
        if index > *current {
            *current = index;
            true
        } else {
            false
        }
    }

    pub fn match_index(&self, peer_id: u64) -> u64 {
        self.match_index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer_id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest index stored on a majority of members, counting the leader at
    /// `leader_last_index`.
    pub fn majority_index(&self, leader_last_index: u64) -> u64 {
        let mut indices: Vec<u64> = self
            .members
            .nodes()
            .iter()
            .map(|node| {
                if node.id() == self.leader_id {
                    leader_last_index
                } else {
                    self.match_index(node.id())
                }
            })
            .collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices[self.members.majority() - 1]
    }
}

/// Advance the commit index to the highest majority-replicated entry, provided
/// that entry belongs to the leader's own term.
pub fn advance_commit(context: &LeaderContext, log: &dyn RaftLog) -> bool {
    let candidate = context.majority_index(log.last_index());
    if candidate <= log.commit_index() {
        return false;
    }
    // Entries from earlier terms only commit indirectly
    if log.term_at(candidate) != Some(context.term) {
        return false;
    }
    log.commit(candidate);
    tracing::debug!(
        node_id = context.leader_id,
        term = context.term,
        commit_index = candidate,
        "Updated commit index"
    );
    true
}

/// Owns the log and drives replication for one term.
pub(crate) struct Leader {
    shared: Arc<RaftShared>,
    context: Option<Arc<LeaderContext>>,
    replicator: Option<Replicator>,
}

impl Leader {
    pub fn new(shared: Arc<RaftShared>) -> Self {
        Self {
            shared,
            context: None,
            replicator: None,
        }
    }
}

#[tonic::async_trait]
impl RoleDelegate for Leader {
    fn role(&self) -> RaftRole {
        RaftRole::Leader
    }

    async fn on(&mut self) {
        let shared = &self.shared;
        let term = shared.current_term();
        let context = Arc::new(LeaderContext::new(
            term,
            shared.id,
            shared.messenger.cluster_set().clone(),
            shared.log.last_index(),
        ));

        let noop_index = shared
            .log
            .append(Entry::noop(term, shared.id), LogChangeReason::Leadership);
        tracing::info!(
            node_id = shared.id,
            term,
            noop_index,
            peers = context.members.size() - 1,
            "Became leader"
        );
        advance_commit(&context, shared.log.as_ref());

        let mut replicator = Replicator::new(shared.clone(), context.clone());
        replicator.start();
        self.replicator = Some(replicator);
        self.context = Some(context);
    }

    async fn off(&mut self) {
        if let Some(mut replicator) = self.replicator.take() {
            replicator.stop().await;
        }
        if let Some(context) = self.context.take() {
            tracing::info!(node_id = self.shared.id, term = context.term, "Leaving leadership");
        }
    }

    fn delegate_append_entries(&self, req: &AppendEntriesRequest) -> AppendEntriesResponse {
        tracing::warn!(
            node_id = self.shared.id,
            from = req.leader_id,
            term = req.term,
            "Rejecting AppendEntries while leader"
        );
        AppendEntriesResponse {
            term: self.shared.current_term(),
            success: false,
            match_index: self.shared.log.last_index(),
        }
    }

    fn delegate_request_vote(&self, req: &VoteRequest) -> VoteResponse {
        tracing::debug!(
            node_id = self.shared.id,
            candidate = req.candidate_id,
            term = req.term,
            "Rejecting vote while leader"
        );
        VoteResponse {
            term: self.shared.current_term(),
            vote_granted: false,
        }
    }

    fn propose(&self, namespace: &str, payload: Payload) -> Result<Proposal> {
        let context = self
            .context
            .as_ref()
            .ok_or(QuorumError::NotLeader(None))?;
        let log = self.shared.log.as_ref();

        let index = log.append(
            Entry::new(context.term, self.shared.id, namespace, payload),
            LogChangeReason::Client,
        );
        let committed = log.wait_for_commit(index);
        tracing::debug!(
            node_id = self.shared.id,
            index,
            term = context.term,
            "Appended command to log"
        );
        advance_commit(context, log);

        Ok(Proposal {
            index,
            term: context.term,
            committed,
        })
    }
}

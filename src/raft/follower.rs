use std::sync::Arc;

use crate::error::{QuorumError, Result};
use crate::log::Payload;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::node::{Proposal, RaftShared};
use crate::raft::role::RoleDelegate;
use crate::raft::rpc::{handle_append_entries, handle_request_vote};
use crate::raft::timer::ElectionTimer;
use crate::raft::RaftRole;

/// Accepts entries from the leader and votes; campaigns once the leader goes
/// quiet for a full election timeout.
pub(crate) struct Follower {
    shared: Arc<RaftShared>,
    timer: ElectionTimer,
}

impl Follower {
    pub fn new(shared: Arc<RaftShared>) -> Self {
        Self {
            shared,
            timer: ElectionTimer::new(),
        }
    }
}

#[tonic::async_trait]
impl RoleDelegate for Follower {
    fn role(&self) -> RaftRole {
        RaftRole::Follower
    }

    async fn on(&mut self) {
        self.timer.start(self.shared.clone());
    }

    async fn off(&mut self) {
        self.timer.stop().await;
    }

    fn delegate_append_entries(&self, req: &AppendEntriesRequest) -> AppendEntriesResponse {
        let shared = &self.shared;
        let resp = shared
            .with_context(|ctx| handle_append_entries(ctx, shared.log.as_ref(), req, shared.id));
        // Any request from the current leader counts, even a rejected one
        if resp.term == req.term {
            self.timer.reset();
        }
        resp
    }

    fn delegate_request_vote(&self, req: &VoteRequest) -> VoteResponse {
        let shared = &self.shared;
        let resp =
            shared.with_context(|ctx| handle_request_vote(ctx, shared.log.as_ref(), req, shared.id));
        if resp.vote_granted {
            self.timer.reset();
        }
        resp
    }

    fn propose(&self, _namespace: &str, _payload: Payload) -> Result<Proposal> {
        Err(QuorumError::NotLeader(self.shared.context().leader_id))
    }
}

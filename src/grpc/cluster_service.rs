use tonic::{Request, Response, Status};

use crate::proto::raft_service_server::RaftService;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::Raft;

/// gRPC service for peer-to-peer Raft traffic
pub struct ClusterService {
    raft: Raft,
}

impl ClusterService {
    pub fn new(raft: Raft) -> Self {
        Self { raft }
    }
}

#[tonic::async_trait]
impl RaftService for ClusterService {
    async fn request_vote(
        &self,
        request: Request<VoteRequest>,
    ) -> Result<Response<VoteResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            node_id = self.raft.id(),
            candidate = req.candidate_id,
            term = req.term,
            "Received RequestVote"
        );

        let response = self.raft.handle_request_vote(req).await;
        Ok(Response::new(response))
    }

    async fn append_entries(
        &self,
        request: Request<AppendEntriesRequest>,
    ) -> Result<Response<AppendEntriesResponse>, Status> {
        let req = request.into_inner();
        let is_heartbeat = req.entries.is_empty();
        tracing::trace!(
            node_id = self.raft.id(),
            leader = req.leader_id,
            term = req.term,
            entries = req.entries.len(),
            is_heartbeat,
            "Received AppendEntries"
        );

        let response = self.raft.handle_append_entries(req).await;
        Ok(Response::new(response))
    }
}

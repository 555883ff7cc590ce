use crate::error::{QuorumError, Result};
use crate::log::Payload;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::node::Proposal;
use crate::raft::RaftRole;

/// Behaviour of the node while one role is active.
///
/// `on` runs exactly once when the role is entered and `off` exactly once when
/// it is left. `off` has returned, and every task the role spawned has stopped,
/// before the next role's `on` starts.
///
/// Inbound RPCs reach the delegate only after any term change they carry has
/// been applied, so `req.term` is never above the current term here.
#[tonic::async_trait]
pub(crate) trait RoleDelegate: Send + Sync {
    fn role(&self) -> RaftRole;

    async fn on(&mut self);

    async fn off(&mut self);

    fn delegate_append_entries(&self, req: &AppendEntriesRequest) -> AppendEntriesResponse;

    fn delegate_request_vote(&self, req: &VoteRequest) -> VoteResponse;

    /// Append a client command. Only a leader accepts proposals.
    fn propose(&self, _namespace: &str, _payload: Payload) -> Result<Proposal> {
        Err(QuorumError::NotLeader(None))
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::cluster::{ClusterSet, ConnectionPool, Node, PeerChannel};
use crate::error::{QuorumError, Result};
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};

/// Best-effort, time-bounded peer RPCs for the consensus layer.
///
/// Every dispatch returns exactly one result. Unreachable, slow, unknown and
/// failing peers all come back as `Err` and never panic or propagate further.
#[derive(Clone)]
pub struct ClusterMessenger {
    pool: Arc<ConnectionPool>,
    rpc_timeout: Duration,
}

impl ClusterMessenger {
    pub fn new(pool: Arc<ConnectionPool>, rpc_timeout: Duration) -> Self {
        Self { pool, rpc_timeout }
    }

    pub fn cluster_set(&self) -> &ClusterSet {
        self.pool.cluster_set()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub async fn dispatch_append_entries(
        &self,
        node: &Node,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let channel = self.channel(node)?;
        self.bounded(node, channel.append_entries(request)).await
    }

    pub async fn dispatch_request_vote(
        &self,
        node: &Node,
        request: VoteRequest,
    ) -> Result<VoteResponse> {
        let channel = self.channel(node)?;
        self.bounded(node, channel.request_vote(request)).await
    }

    fn channel(&self, node: &Node) -> Result<Arc<dyn PeerChannel>> {
        self.pool.get_channel(node).ok_or_else(|| {
            tracing::debug!(peer_id = node.id(), "Node not found in connection pool");
            QuorumError::NodeNotFound(node.id())
        })
    }

    async fn bounded<T>(&self, node: &Node, call: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.rpc_timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                tracing::debug!(peer_id = node.id(), error = %e, "Node unreachable");
                Err(e)
            }
            Err(_) => {
                tracing::debug!(
                    peer_id = node.id(),
                    timeout_ms = self.rpc_timeout.as_millis() as u64,
                    "RPC timed out"
                );
                Err(QuorumError::RpcTimeout {
                    node_id: node.id(),
                    timeout_ms: self.rpc_timeout.as_millis() as u64,
                })
            }
        }
    }
}

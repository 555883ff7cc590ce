use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tonic::transport::{Channel, Endpoint};

use crate::cluster::{ClusterSet, Node};
use crate::error::Result;
use crate::proto::raft_service_client::RaftServiceClient;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};

/// A communication channel to one peer.
#[tonic::async_trait]
pub trait PeerChannel: Send + Sync {
    async fn append_entries(&self, request: AppendEntriesRequest)
        -> Result<AppendEntriesResponse>;

    async fn request_vote(&self, request: VoteRequest) -> Result<VoteResponse>;
}

/// gRPC channel to a peer's `RaftService`
#[derive(Debug, Clone)]
pub struct GrpcPeerChannel {
    client: RaftServiceClient<Channel>,
}

impl GrpcPeerChannel {
    /// Create a channel that connects on first use, so peers that are not up yet
    /// do not block startup.
    pub fn connect_lazy(addr: &str) -> Result<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{}", addr))?;
        Ok(Self {
            client: RaftServiceClient::new(endpoint.connect_lazy()),
        })
    }
}

#[tonic::async_trait]
impl PeerChannel for GrpcPeerChannel {
    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let mut client = self.client.clone();
        Ok(client.append_entries(request).await?.into_inner())
    }

    async fn request_vote(&self, request: VoteRequest) -> Result<VoteResponse> {
        let mut client = self.client.clone();
        Ok(client.request_vote(request).await?.into_inner())
    }
}

/// Resolves cluster members to channels.
pub struct ConnectionPool {
    cluster: ClusterSet,
    channels: RwLock<HashMap<u64, Arc<dyn PeerChannel>>>,
}

impl ConnectionPool {
    pub fn new(cluster: ClusterSet) -> Self {
        Self {
            cluster,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Open a lazy gRPC channel to every peer in the cluster set
    pub fn initialize(&self) {
        for peer in self.cluster.peers() {
            match GrpcPeerChannel::connect_lazy(peer.addr()) {
                Ok(channel) => {
                    tracing::info!(peer_id = peer.id(), addr = %peer.addr(), "Pooled peer channel");
                    self.insert(peer.id(), Arc::new(channel));
                }
                Err(e) => {
                    tracing::warn!(
                        peer_id = peer.id(),
                        addr = %peer.addr(),
                        error = %e,
                        "Failed to create peer channel"
                    );
                }
            }
        }
    }

    pub fn cluster_set(&self) -> &ClusterSet {
        &self.cluster
    }

    pub fn insert(&self, node_id: u64, channel: Arc<dyn PeerChannel>) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id, channel);
    }

    pub fn remove(&self, node_id: u64) -> Option<Arc<dyn PeerChannel>> {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&node_id)
    }

    pub fn get_channel(&self, node: &Node) -> Option<Arc<dyn PeerChannel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node.id())
            .cloned()
    }
}

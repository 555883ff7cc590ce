use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuorumError {
    #[error("Not the leader, current leader is node {0:?}")]
    NotLeader(Option<u64>),

    #[error("Node not found in connection pool: {0}")]
    NodeNotFound(u64),

    #[error("RPC to node {node_id} timed out after {timeout_ms}ms")]
    RpcTimeout { node_id: u64, timeout_ms: u64 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuorumError {
    /// True for failures that mean "the peer could not be reached in time".
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            QuorumError::NodeNotFound(_)
                | QuorumError::RpcTimeout { .. }
                | QuorumError::GrpcError(_)
                | QuorumError::TransportError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QuorumError>;

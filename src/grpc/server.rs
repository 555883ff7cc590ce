use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::client::CommandReceiver;
use crate::grpc::client_service::ClientService;
use crate::grpc::cluster_service::ClusterService;
use crate::proto::command_service_server::CommandServiceServer;
use crate::proto::raft_service_server::RaftServiceServer;
use crate::raft::Raft;

pub struct GrpcServer {
    addr: SocketAddr,
    raft: Raft,
    receiver: CommandReceiver,
    default_command_timeout: Duration,
}

impl GrpcServer {
    pub fn new(
        addr: SocketAddr,
        raft: Raft,
        receiver: CommandReceiver,
        default_command_timeout: Duration,
    ) -> Self {
        Self {
            addr,
            raft,
            receiver,
            default_command_timeout,
        }
    }

    /// Serve both services until `shutdown` fires, then drain in-flight calls.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let cluster_service = ClusterService::new(self.raft.clone());
        let client_service = ClientService::new(self.receiver, self.default_command_timeout);

        tracing::info!(node_id = self.raft.id(), addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(RaftServiceServer::new(cluster_service))
            .add_service(CommandServiceServer::new(client_service))
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await?;

        tracing::info!(node_id = self.raft.id(), "gRPC server stopped");
        Ok(())
    }
}

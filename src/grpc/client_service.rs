use std::time::Duration;

use tonic::{Request, Response, Status};

use crate::client::{ClientAck, Command, CommandBundle, CommandReceiver};
use crate::proto::command_service_server::CommandService;
use crate::proto::{
    ClientCommandRequest, ClientCommandResponse, GetStatusRequest, GetStatusResponse,
};

/// gRPC service for client-facing command admission
pub struct ClientService {
    receiver: CommandReceiver,
    default_timeout: Duration,
}

impl ClientService {
    pub fn new(receiver: CommandReceiver, default_timeout: Duration) -> Self {
        Self {
            receiver,
            default_timeout,
        }
    }

    fn timeout_for(&self, timeout_ms: u64) -> Duration {
        if timeout_ms == 0 {
            self.default_timeout
        } else {
            Duration::from_millis(timeout_ms)
        }
    }
}

impl From<ClientAck> for ClientCommandResponse {
    fn from(ack: ClientAck) -> Self {
        Self {
            ok: ack.is_ok(),
            message: ack.message().to_string(),
        }
    }
}

#[tonic::async_trait]
impl CommandService for ClientService {
    async fn client_command(
        &self,
        request: Request<ClientCommandRequest>,
    ) -> Result<Response<ClientCommandResponse>, Status> {
        let req = request.into_inner();
        let args = req
            .args
            .into_iter()
            .map(|pair| (pair.arg, pair.param))
            .collect();

        let command = match Command::new(req.command, args) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting malformed command");
                return Ok(Response::new(ClientAck::Error(e.to_string()).into()));
            }
        };

        let op = command.category();
        let timeout = self.timeout_for(req.timeout_ms);
        let (bundle, ack) = CommandBundle::new(command, op, timeout);
        self.receiver.receive(bundle).await;

        // Every admitted bundle is resolved exactly once, so a closed channel
        // means the node went away underneath us.
        let ack = ack
            .await
            .map_err(|_| Status::unavailable("node shutting down"))?;
        Ok(Response::new(ack.into()))
    }

    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        let status = self.receiver.raft().status();
        Ok(Response::new(GetStatusResponse {
            node_id: status.node_id,
            role: status.role,
            term: status.term,
            leader_id: status.leader_id.unwrap_or(0),
            last_log_index: status.last_log_index,
            commit_index: status.commit_index,
            active_replicators: status.active_replicators as u64,
            pending_commands: self.receiver.pending() as u64,
        }))
    }
}

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::apply::CommitApplier;
use crate::client::CommandReceiver;
use crate::cluster::{ClusterMessenger, ClusterSet, ConnectionPool};
use crate::config::NodeConfig;
use crate::grpc::GrpcServer;
use crate::log::{MemoryLog, RaftLog};
use crate::raft::{Raft, RaftEvent};

/// Main node that orchestrates all components
pub struct Node {
    pub config: NodeConfig,
    pub raft: Raft,
    pub receiver: CommandReceiver,
    pub applier: CommitApplier,
}

impl Node {
    pub fn new(config: NodeConfig) -> (Self, mpsc::Receiver<RaftEvent>) {
        let pool = Arc::new(ConnectionPool::new(ClusterSet::from_config(&config)));
        pool.initialize();
        let messenger = ClusterMessenger::new(pool, config.rpc_timeout());
        let log: Arc<dyn RaftLog> = Arc::new(MemoryLog::new());

        let (raft, events) = Raft::new(config.clone(), log.clone(), messenger);
        let receiver = CommandReceiver::new(raft.clone(), config.op_policy.clone());
        let applier = CommitApplier::new(config.node_id, log);

        let node = Self {
            config,
            raft,
            receiver,
            applier,
        };
        (node, events)
    }

    /// Run the node with all components until `shutdown` fires.
    ///
    /// Spawns the Raft event loop, the admission monitor and the commit
    /// applier, then serves gRPC on the calling task.
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC server fails to bind or encounters a fatal
    /// error. The spawned components log their own problems.
    pub async fn run(
        self,
        events: mpsc::Receiver<RaftEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let raft = self.raft.clone();
        let raft_shutdown = shutdown.clone();
        let raft_task = tokio::spawn(async move {
            raft.run(events, raft_shutdown).await;
        });

        let receiver = self.receiver.clone();
        let sweep_interval = self.config.bundle_sweep_interval();
        let monitor_shutdown = shutdown.clone();
        let monitor_task = tokio::spawn(async move {
            receiver.monitor(sweep_interval, monitor_shutdown).await;
        });

        let applier_task = tokio::spawn(self.applier.run(shutdown.clone()));

        let server = GrpcServer::new(
            self.config.listen_addr,
            self.raft.clone(),
            self.receiver.clone(),
            self.config.default_command_timeout(),
        );
        let served = server.run(shutdown.clone()).await;
        // A server that failed to start still has to take the rest down
        shutdown.cancel();

        for (name, task) in [
            ("raft", raft_task),
            ("monitor", monitor_task),
            ("applier", applier_task),
        ] {
            if let Err(e) = task.await {
                tracing::error!(node_id = self.config.node_id, task = name, error = %e, "Task failed");
            }
        }

        served?;
        tracing::info!(node_id = self.config.node_id, "Node stopped");
        Ok(())
    }
}

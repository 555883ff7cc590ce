use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{ClientAck, CommandBundle, OpCategory};
use crate::config::OpPolicy;
use crate::error::QuorumError;
use crate::log::SYSTEM_NAMESPACE;
use crate::raft::{Raft, RaftRole, RoleChange};

pub const UNSUPPORTED_MESSAGE: &str = "operation not supported on this node";
pub const TIMEOUT_MESSAGE: &str = "command timed out before commit";

struct Registered {
    responder: oneshot::Sender<ClientAck>,
    op: OpCategory,
    deadline: Instant,
    /// Task waiting on the commit, aborted if the bundle resolves another way
    completion: Option<AbortHandle>,
}

impl Registered {
    fn resolve(self, ack: ClientAck) {
        if let Some(handle) = self.completion {
            handle.abort();
        }
        // The client may have gone away; nothing to do then
        let _ = self.responder.send(ack);
    }
}

/// Admits client command bundles into the log and resolves each one exactly
/// once: on commit, on deadline, or when the node's role stops supporting it.
///
/// Whoever removes a bundle from the registry is the one that answers it.
#[derive(Clone)]
pub struct CommandReceiver {
    raft: Raft,
    policy: OpPolicy,
    registry: Arc<Mutex<HashMap<Uuid, Registered>>>,
}

impl CommandReceiver {
    pub fn new(raft: Raft, policy: OpPolicy) -> Self {
        Self {
            raft,
            policy,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, Registered>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, id: &Uuid) -> Option<Registered> {
        self.registry().remove(id)
    }

    /// Number of bundles awaiting resolution
    pub fn pending(&self) -> usize {
        self.registry().len()
    }

    pub fn policy(&self) -> &OpPolicy {
        &self.policy
    }

    pub fn raft(&self) -> &Raft {
        &self.raft
    }

    /// Admit a bundle. Returns once it is registered or already answered; the
    /// final answer arrives on the bundle's receiver.
    pub async fn receive(&self, bundle: CommandBundle) {
        let role = self.raft.role();
        if !self.policy.allows(role, bundle.op) {
            tracing::debug!(
                node_id = self.raft.id(),
                command = %bundle.command,
                op = %bundle.op,
                %role,
                "Rejecting unsupported command"
            );
            let _ = bundle
                .into_responder()
                .send(ClientAck::Error(UNSUPPORTED_MESSAGE.to_string()));
            return;
        }

        if role != RaftRole::Leader {
            // Only reads can be admitted off the leader; answer from local state
            let commit_index = self.raft.log().commit_index();
            tracing::debug!(
                node_id = self.raft.id(),
                command = %bundle.command,
                commit_index,
                "Serving read locally"
            );
            let _ = bundle
                .into_responder()
                .send(ClientAck::Ok(format!("ok (read at commit index {})", commit_index)));
            return;
        }

        let id = Uuid::new_v4();
        let payload = bundle.command.to_payload();
        let op = bundle.op;
        let deadline = Instant::now() + bundle.timeout;
        tracing::debug!(
            node_id = self.raft.id(),
            bundle_id = %id,
            command = %bundle.command,
            timeout_ms = bundle.timeout.as_millis() as u64,
            "Registered command"
        );
        self.registry().insert(
            id,
            Registered {
                responder: bundle.into_responder(),
                op,
                deadline,
                completion: None,
            },
        );

        let proposal = match self.raft.propose(SYSTEM_NAMESPACE, payload).await {
            Ok(proposal) => proposal,
            Err(e) => {
                if let Some(registered) = self.take(&id) {
                    tracing::debug!(bundle_id = %id, error = %e, "Proposal refused");
                    // Leadership moved between the role check and the append
                    let message = match e {
                        QuorumError::NotLeader(_) => UNSUPPORTED_MESSAGE.to_string(),
                        other => other.to_string(),
                    };
                    registered.resolve(ClientAck::Error(message));
                }
                return;
            }
        };

        let receiver = self.clone();
        let task = tokio::spawn(async move {
            let (index, term) = (proposal.index, proposal.term);
            if proposal.committed.await.is_err() {
                // Entry was truncated away; the deadline sweep answers the client
                tracing::debug!(bundle_id = %id, index, "Proposal dropped before commit");
                return;
            }
            if receiver.raft.log().term_at(index) != Some(term) {
                tracing::debug!(bundle_id = %id, index, term, "Committed entry is not ours");
                return;
            }
            // A bundle already answered by the sweep is simply gone
            if let Some(registered) = receiver.take(&id) {
                tracing::debug!(bundle_id = %id, index, "Command committed");
                let _ = registered
                    .responder
                    .send(ClientAck::Ok(format!("ok (index {})", index)));
            }
        });

        if let Some(registered) = self.registry().get_mut(&id) {
            registered.completion = Some(task.abort_handle());
        }
    }

    /// Answer every bundle whose deadline has passed. Returns how many.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Registered> = {
            let mut registry = self.registry();
            let ids: Vec<Uuid> = registry
                .iter()
                .filter(|(_, r)| r.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| registry.remove(id)).collect()
        };

        let count = expired.len();
        for registered in expired {
            registered.resolve(ClientAck::Error(TIMEOUT_MESSAGE.to_string()));
        }
        if count > 0 {
            tracing::debug!(node_id = self.raft.id(), count, "Expired pending commands");
        }
        count
    }

    /// Answer every bundle `role` no longer supports. Returns how many.
    pub fn reject_unsupported(&self, role: RaftRole) -> usize {
        let rejected: Vec<Registered> = {
            let mut registry = self.registry();
            let ids: Vec<Uuid> = registry
                .iter()
                .filter(|(_, r)| !self.policy.allows(role, r.op))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| registry.remove(id)).collect()
        };

        let count = rejected.len();
        for registered in rejected {
            registered.resolve(ClientAck::Error(UNSUPPORTED_MESSAGE.to_string()));
        }
        if count > 0 {
            tracing::info!(
                node_id = self.raft.id(),
                %role,
                count,
                "Rejected pending commands after role change"
            );
        }
        count
    }

    /// Background loop: expire bundles every `sweep_interval` and re-check
    /// eligibility on every role change. Runs until `shutdown` fires, then
    /// fails whatever is still pending.
    pub async fn monitor(&self, sweep_interval: Duration, shutdown: CancellationToken) {
        let mut role_changes = self.raft.subscribe_role_changes();
        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep_expired();
                }
                change = role_changes.recv() => match change {
                    Ok(RoleChange { to, .. }) => {
                        self.reject_unsupported(to);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Missed role changes, re-checking current role");
                        self.reject_unsupported(self.raft.role());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        let remaining: Vec<Registered> = self.registry().drain().map(|(_, r)| r).collect();
        for registered in remaining {
            registered.resolve(ClientAck::Error("node shutting down".to_string()));
        }
    }
}

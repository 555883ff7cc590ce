use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cluster::Node;
use crate::proto::AppendEntriesRequest;
use crate::raft::leader::{advance_commit, LeaderContext};
use crate::raft::node::{RaftEvent, RaftShared};
use crate::raft::rpc::entry_to_proto;
use crate::raft::task_group::TaskGroup;

/// Leader-side coordinator of one replication worker per peer.
///
/// Lives exactly as long as one leadership term. After [`stop`](Self::stop)
/// returns no worker is running and no further peer RPC will be issued.
pub struct Replicator {
    shared: Arc<RaftShared>,
    context: Arc<LeaderContext>,
    workers: TaskGroup,
    running: bool,
}

impl Replicator {
    pub(crate) fn new(shared: Arc<RaftShared>, context: Arc<LeaderContext>) -> Self {
        Self {
            shared,
            context,
            workers: TaskGroup::new(),
            running: false,
        }
    }

    pub fn start(&mut self) {
        if self.running || self.workers.is_cancelled() {
            return;
        }
        self.running = true;
        self.shared.active_replicators.fetch_add(1, Ordering::SeqCst);

        for peer in self.context.members.peers() {
            let worker = ReplicationWorker {
                shared: self.shared.clone(),
                context: self.context.clone(),
                peer: peer.clone(),
                token: self.workers.token(),
                next_index: self.context.last_index_at_accession + 1,
                reachable: true,
            };
            self.workers.spawn(worker.run());
        }

        tracing::debug!(
            node_id = self.shared.id,
            term = self.context.term,
            workers = self.workers.len(),
            "Replicator started"
        );
    }

    /// Cancel every worker and wait for them to finish. Idempotent.
    pub async fn stop(&mut self) {
        self.workers.cancel().await;
        if self.running {
            self.running = false;
            self.shared.active_replicators.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(
                node_id = self.shared.id,
                term = self.context.term,
                "Replicator stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Drives AppendEntries against a single peer until cancelled.
struct ReplicationWorker {
    shared: Arc<RaftShared>,
    context: Arc<LeaderContext>,
    peer: Node,
    token: CancellationToken,
    next_index: u64,
    reachable: bool,
}

enum Step {
    /// Peer may be behind, send again right away
    Continue,
    /// Peer is caught up, wait for new entries or the heartbeat interval
    Idle,
    /// Dispatch failed, wait out the backoff
    Backoff,
    /// A newer term exists; stop issuing RPCs
    Halt,
}

impl ReplicationWorker {
    async fn run(mut self) {
        let heartbeat = self.shared.config.heartbeat_interval();
        let backoff = self.shared.config.replication_backoff();
        let mut appends = self.shared.log.subscribe_appends();
        let token = self.token.clone();

        loop {
            appends.borrow_and_update();
            let step = tokio::select! {
                _ = token.cancelled() => return,
                step = self.replicate_once() => step,
            };

            match step {
                Step::Continue => {}
                Step::Idle => {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(heartbeat) => {}
                        Ok(()) = appends.changed() => {}
                    }
                }
                Step::Backoff => {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Step::Halt => {
                    // Park until the step-down cancels us
                    token.cancelled().await;
                    return;
                }
            }
        }
    }

    fn build_request(&mut self) -> AppendEntriesRequest {
        let log = self.shared.log.as_ref();
        self.next_index = self.next_index.clamp(1, log.last_index() + 1);
        let prev_log_index = self.next_index - 1;
        let entries = log
            .entries_from(self.next_index, self.shared.config.max_entries_per_append)
            .iter()
            .map(entry_to_proto)
            .collect();

        AppendEntriesRequest {
            term: self.context.term,
            leader_id: self.context.leader_id,
            prev_log_index,
            prev_log_term: log.term_at(prev_log_index).unwrap_or(0),
            entries,
            leader_commit: log.commit_index(),
        }
    }

    async fn replicate_once(&mut self) -> Step {
        let request = self.build_request();
        let prev_log_index = request.prev_log_index;
        let sent = request.entries.len() as u64;
        let peer_id = self.peer.id();

        if sent == 0 {
            tracing::trace!(peer_id, term = self.context.term, "Sending heartbeat");
        }

        let resp = match self
            .shared
            .messenger
            .dispatch_append_entries(&self.peer, request)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if self.reachable {
                    tracing::warn!(
                        node_id = self.shared.id,
                        peer_id,
                        error = %e,
                        "Peer unreachable, will keep retrying"
                    );
                    self.reachable = false;
                }
                return Step::Backoff;
            }
        };

        if !self.reachable {
            tracing::info!(node_id = self.shared.id, peer_id, "Peer reachable again");
            self.reachable = true;
        }

        if resp.term > self.context.term {
            tracing::info!(
                node_id = self.shared.id,
                peer_id,
                term = self.context.term,
                peer_term = resp.term,
                "Peer has higher term, stepping down"
            );
            self.shared
                .notify(RaftEvent::HigherTermObserved { term: resp.term })
                .await;
            return Step::Halt;
        }

        if resp.success {
            let matched = prev_log_index + sent;
            if self.context.record_match(peer_id, matched) {
                tracing::debug!(peer_id, match_index = matched, "Peer log advanced");
                advance_commit(&self.context, self.shared.log.as_ref());
            }
            self.next_index = matched + 1;
            if self.next_index <= self.shared.log.last_index() {
                Step::Continue
            } else {
                Step::Idle
            }
        } else {
            let previous = self.next_index;
            self.next_index = (self.next_index - 1)
                .min(resp.match_index + 1)
                .max(1);
            tracing::debug!(
                peer_id,
                next_index = self.next_index,
                hint = resp.match_index,
                "AppendEntries rejected, backing up"
            );
            if self.next_index < previous {
                Step::Continue
            } else {
                Step::Backoff
            }
        }
    }
}

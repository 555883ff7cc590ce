use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterMessenger;
use crate::config::NodeConfig;
use crate::error::{QuorumError, Result};
use crate::log::{Payload, RaftLog};
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::candidate::Candidate;
use crate::raft::follower::Follower;
use crate::raft::leader::Leader;
use crate::raft::role::RoleDelegate;
use crate::raft::state::{RaftContext, RaftRole};

/// Signals from timers, elections and replication workers to the event loop.
///
/// Each carries the term it was produced under; events from an older term are
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftEvent {
    /// Election timer expired while following or campaigning
    ElectionTimeout { term: u64 },
    /// A majority granted our vote request
    ElectionWon { term: u64 },
    /// A peer answered with a newer term
    HigherTermObserved { term: u64 },
}

/// Published after every role transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub from: RaftRole,
    pub to: RaftRole,
    pub term: u64,
}

/// A command accepted into the leader's log
#[derive(Debug)]
pub struct Proposal {
    pub index: u64,
    pub term: u64,
    /// Fires with the commit index once `index` commits; dropped if the entry
    /// is truncated away first.
    pub committed: oneshot::Receiver<u64>,
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaftStatus {
    pub node_id: u64,
    pub role: String,
    pub term: u64,
    pub leader_id: Option<u64>,
    pub voted_for: Option<u64>,
    pub last_log_index: u64,
    pub commit_index: u64,
    pub active_replicators: usize,
}

/// State shared by the role delegates and the tasks they spawn.
pub(crate) struct RaftShared {
    pub id: u64,
    pub config: NodeConfig,
    pub log: Arc<dyn RaftLog>,
    pub messenger: ClusterMessenger,
    context: RwLock<RaftContext>,
    events: mpsc::Sender<RaftEvent>,
    pub active_replicators: AtomicUsize,
}

impl RaftShared {
    pub fn new(
        config: NodeConfig,
        log: Arc<dyn RaftLog>,
        messenger: ClusterMessenger,
        events: mpsc::Sender<RaftEvent>,
    ) -> Self {
        Self {
            id: config.node_id,
            config,
            log,
            messenger,
            context: RwLock::new(RaftContext::new()),
            events,
            active_replicators: AtomicUsize::new(0),
        }
    }

    pub fn context(&self) -> RaftContext {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn with_context<R>(&self, f: impl FnOnce(&mut RaftContext) -> R) -> R {
        let mut ctx = self.context.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut ctx)
    }

    pub fn current_term(&self) -> u64 {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_term
    }

    pub fn role(&self) -> RaftRole {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .role
    }

    pub async fn notify(&self, event: RaftEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!(node_id = self.id, ?event, "Event loop closed, dropping event");
        }
    }
}

/// The role state machine of one node.
///
/// Cheap to clone; clones share the same node.
#[derive(Clone)]
pub struct Raft {
    shared: Arc<RaftShared>,
    /// Active role. The write side is held for a whole transition so that
    /// `off()` and `on()` never interleave; RPC delegation takes the read side.
    delegate: Arc<tokio::sync::RwLock<Box<dyn RoleDelegate>>>,
    role_changes: broadcast::Sender<RoleChange>,
    stopped: Arc<AtomicBool>,
}

impl Raft {
    pub fn new(
        config: NodeConfig,
        log: Arc<dyn RaftLog>,
        messenger: ClusterMessenger,
    ) -> (Self, mpsc::Receiver<RaftEvent>) {
        let (event_tx, event_rx) = mpsc::channel(100);
        let (role_changes, _) = broadcast::channel(64);
        let shared = Arc::new(RaftShared::new(config, log, messenger, event_tx));
        let delegate: Box<dyn RoleDelegate> = Box::new(Follower::new(shared.clone()));

        let raft = Self {
            shared,
            delegate: Arc::new(tokio::sync::RwLock::new(delegate)),
            role_changes,
            stopped: Arc::new(AtomicBool::new(false)),
        };

        (raft, event_rx)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn log(&self) -> &Arc<dyn RaftLog> {
        &self.shared.log
    }

    pub fn context(&self) -> RaftContext {
        self.shared.context()
    }

    pub fn role(&self) -> RaftRole {
        self.shared.role()
    }

    pub fn current_term(&self) -> u64 {
        self.shared.current_term()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == RaftRole::Leader
    }

    pub fn leader_id(&self) -> Option<u64> {
        self.context().leader_id
    }

    /// Number of replicators currently running on this node. Never above one.
    pub fn active_replicators(&self) -> usize {
        self.shared.active_replicators.load(Ordering::SeqCst)
    }

    pub fn subscribe_role_changes(&self) -> broadcast::Receiver<RoleChange> {
        self.role_changes.subscribe()
    }

    pub fn subscribe_commits(&self) -> watch::Receiver<u64> {
        self.shared.log.subscribe_commits()
    }

    pub fn status(&self) -> RaftStatus {
        let ctx = self.context();
        RaftStatus {
            node_id: self.shared.id,
            role: ctx.role.to_string(),
            term: ctx.current_term,
            leader_id: ctx.leader_id,
            voted_for: ctx.voted_for,
            last_log_index: self.shared.log.last_index(),
            commit_index: self.shared.log.commit_index(),
            active_replicators: self.active_replicators(),
        }
    }

    /// Run the event loop until `shutdown` fires. Enters the follower role
    /// first and leaves whatever role is active on the way out.
    pub async fn run(&self, mut events: mpsc::Receiver<RaftEvent>, shutdown: CancellationToken) {
        self.delegate.write().await.on().await;
        tracing::info!(
            node_id = self.shared.id,
            cluster = %self.shared.messenger.cluster_set(),
            "Raft node started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        let mut delegate = self.delegate.write().await;
        self.stopped.store(true, Ordering::SeqCst);
        delegate.off().await;
        tracing::info!(node_id = self.shared.id, "Raft node stopped");
    }

    async fn handle_event(&self, event: RaftEvent) {
        let mut delegate = self.delegate.write().await;
        let ctx = self.shared.context();

        match event {
            RaftEvent::ElectionTimeout { term }
                if term == ctx.current_term && ctx.role != RaftRole::Leader =>
            {
                tracing::info!(node_id = self.shared.id, term, role = %ctx.role, "Starting election");
                self.transition(&mut delegate, RaftRole::Candidate, term)
                    .await;
            }
            RaftEvent::ElectionWon { term }
                if term == ctx.current_term && ctx.role == RaftRole::Candidate =>
            {
                self.transition(&mut delegate, RaftRole::Leader, term).await;
            }
            RaftEvent::HigherTermObserved { term } if term > ctx.current_term => {
                self.step_down_locked(&mut delegate, term).await;
            }
            stale => {
                tracing::trace!(
                    node_id = self.shared.id,
                    event = ?stale,
                    term = ctx.current_term,
                    role = %ctx.role,
                    "Ignoring stale event"
                );
            }
        }
    }

    /// Leave the current role for `to`. The caller holds the delegate write
    /// lock for the whole call.
    async fn transition(&self, delegate: &mut Box<dyn RoleDelegate>, to: RaftRole, term: u64) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let from = delegate.role();
        delegate.off().await;

        let id = self.shared.id;
        let term = self.shared.with_context(|ctx| {
            match to {
                RaftRole::Follower => ctx.become_follower(term),
                RaftRole::Candidate => ctx.become_candidate(id),
                RaftRole::Leader => ctx.become_leader(id),
            }
            ctx.current_term
        });

        let mut next: Box<dyn RoleDelegate> = match to {
            RaftRole::Follower => Box::new(Follower::new(self.shared.clone())),
            RaftRole::Candidate => Box::new(Candidate::new(self.shared.clone())),
            RaftRole::Leader => Box::new(Leader::new(self.shared.clone())),
        };
        next.on().await;
        *delegate = next;

        tracing::info!(node_id = id, %from, %to, term, "Role changed");
        // No subscribers is fine
        let _ = self.role_changes.send(RoleChange { from, to, term });
    }

    /// Adopt a term seen on the wire. A leader or candidate steps down to
    /// follower; a candidate also yields to a leader of its own term.
    async fn step_down(&self, term: u64) {
        let mut delegate = self.delegate.write().await;
        let ctx = self.shared.context();
        if term == ctx.current_term && ctx.role == RaftRole::Candidate {
            self.transition(&mut delegate, RaftRole::Follower, term)
                .await;
        } else {
            self.step_down_locked(&mut delegate, term).await;
        }
    }

    async fn step_down_locked(&self, delegate: &mut Box<dyn RoleDelegate>, term: u64) {
        let ctx = self.shared.context();
        if term <= ctx.current_term {
            return;
        }
        tracing::info!(
            node_id = self.shared.id,
            old_term = ctx.current_term,
            new_term = term,
            role = %ctx.role,
            "Observed higher term"
        );
        if ctx.role == RaftRole::Follower {
            self.shared.with_context(|ctx| ctx.become_follower(term));
        } else {
            self.transition(delegate, RaftRole::Follower, term).await;
        }
    }

    /// Step down on its own task, so a caller that gives up (a dropped RPC)
    /// cannot abandon a transition half way.
    async fn step_down_detached(&self, term: u64) {
        let raft = self.clone();
        if let Err(e) = tokio::spawn(async move { raft.step_down(term).await }).await {
            tracing::error!(node_id = self.shared.id, error = %e, "Step down task failed");
        }
    }

    /// Handle incoming AppendEntries RPC
    pub async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let ctx = self.shared.context();
        if req.term > ctx.current_term
            || (req.term == ctx.current_term && ctx.role == RaftRole::Candidate)
        {
            self.step_down_detached(req.term).await;
        }
        self.delegate.read().await.delegate_append_entries(&req)
    }

    /// Handle incoming RequestVote RPC
    pub async fn handle_request_vote(&self, req: VoteRequest) -> VoteResponse {
        if req.term > self.shared.current_term() {
            self.step_down_detached(req.term).await;
        }
        self.delegate.read().await.delegate_request_vote(&req)
    }

    #[cfg(test)]
    pub(crate) async fn inject(&self, event: RaftEvent) {
        self.shared.notify(event).await;
    }

    /// Append a command to the log through the active role.
    ///
    /// Fails with `NotLeader` unless this node is the leader.
    pub async fn propose(&self, namespace: &str, payload: Payload) -> Result<Proposal> {
        let delegate = self.delegate.read().await;
        delegate.propose(namespace, payload).map_err(|e| match e {
            QuorumError::NotLeader(None) => QuorumError::NotLeader(self.leader_id()),
            other => other,
        })
    }
}

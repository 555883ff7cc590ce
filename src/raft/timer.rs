use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::raft::node::{RaftEvent, RaftShared};

/// Generates a random election timeout within the configured range
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(min_ms..=max_ms.max(min_ms));
    Duration::from_millis(timeout_ms)
}

/// Randomized election timer owned by a follower or candidate.
///
/// Fires `RaftEvent::ElectionTimeout` every time a full timeout passes without a
/// [`reset`](Self::reset), and keeps re-arming until stopped.
pub struct ElectionTimer {
    reset: Arc<Notify>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ElectionTimer {
    pub fn new() -> Self {
        Self {
            reset: Arc::new(Notify::new()),
            token: CancellationToken::new(),
            handle: None,
        }
    }

    pub(crate) fn start(&mut self, shared: Arc<RaftShared>) {
        if self.handle.is_some() {
            return;
        }
        let reset = self.reset.clone();
        let token = self.token.clone();
        let (min_ms, max_ms) = (
            shared.config.election_timeout_min_ms,
            shared.config.election_timeout_max_ms,
        );

        self.handle = Some(tokio::spawn(async move {
            loop {
                let timeout = random_election_timeout(min_ms, max_ms);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = reset.notified() => continue,
                    _ = tokio::time::sleep(timeout) => {
                        let term = shared.current_term();
                        tracing::debug!(
                            node_id = shared.id,
                            term,
                            timeout_ms = timeout.as_millis() as u64,
                            "Election timeout"
                        );
                        shared.notify(RaftEvent::ElectionTimeout { term }).await;
                    }
                }
            }
        }));
    }

    /// Push the deadline out by a fresh random timeout
    pub fn reset(&self) {
        self.reset.notify_one();
    }

    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Election timer panicked");
                }
            }
        }
    }
}

impl Default for ElectionTimer {
    fn default() -> Self {
        Self::new()
    }
}

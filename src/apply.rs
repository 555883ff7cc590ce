use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::Command;
use crate::log::{Entry, RaftLog, SYSTEM_NAMESPACE};

/// Consumes committed entries in log order on every node.
///
/// System-namespace commands are logged as they apply; the leader's no-ops
/// only advance `last_applied`.
pub struct CommitApplier {
    node_id: u64,
    log: Arc<dyn RaftLog>,
    last_applied: Arc<AtomicU64>,
}

impl CommitApplier {
    pub fn new(node_id: u64, log: Arc<dyn RaftLog>) -> Self {
        Self {
            node_id,
            log,
            last_applied: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared view of the highest applied index
    pub fn last_applied(&self) -> Arc<AtomicU64> {
        self.last_applied.clone()
    }

    /// Apply everything up to the current commit index. Returns the entries
    /// applied by this call.
    pub fn apply_committed(&self) -> Vec<Entry> {
        let commit_index = self.log.commit_index();
        let mut applied = Vec::new();
        let mut next = self.last_applied.load(Ordering::SeqCst) + 1;

        while next <= commit_index {
            let Some(entry) = self.log.entry(next) else {
                tracing::error!(node_id = self.node_id, index = next, "Committed entry missing");
                break;
            };
            self.apply(&entry);
            self.last_applied.store(next, Ordering::SeqCst);
            applied.push(entry);
            next += 1;
        }
        applied
    }

    fn apply(&self, entry: &Entry) {
        if entry.is_noop() {
            return;
        }
        if entry.namespace != SYSTEM_NAMESPACE {
            tracing::debug!(
                node_id = self.node_id,
                index = entry.index,
                namespace = %entry.namespace,
                "Skipping entry outside the system namespace"
            );
            return;
        }
        match Command::from_payload(&entry.payload) {
            Some(command) => tracing::info!(
                node_id = self.node_id,
                index = entry.index,
                term = entry.term,
                command = %command,
                "Applied command"
            ),
            None => tracing::warn!(
                node_id = self.node_id,
                index = entry.index,
                "Committed entry has no command"
            ),
        }
    }

    /// Apply commits as they arrive until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut commits = self.log.subscribe_commits();
        loop {
            commits.borrow_and_update();
            self.apply_committed();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = commits.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(
            node_id = self.node_id,
            last_applied = self.last_applied.load(Ordering::SeqCst),
            "Commit applier stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogChangeReason, MemoryLog, Payload};
    use std::time::Duration;

    fn command(name: &str) -> Entry {
        let mut payload = Payload::new();
        payload.insert("command".to_string(), name.to_string());
        Entry::new(1, 1, SYSTEM_NAMESPACE, payload)
    }

    #[test]
    fn test_applies_in_order_up_to_commit() {
        let log = Arc::new(MemoryLog::new());
        log.append(Entry::noop(1, 1), LogChangeReason::Leadership);
        log.append(command("create-topic"), LogChangeReason::Client);
        log.append(command("create-topic"), LogChangeReason::Client);
        let applier = CommitApplier::new(1, log.clone());

        assert!(applier.apply_committed().is_empty());

        log.commit(2);
        let applied = applier.apply_committed();
        assert_eq!(applied.iter().map(|e| e.index).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(applier.last_applied().load(Ordering::SeqCst), 2);

        log.commit(3);
        let applied = applier.apply_committed();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].index, 3);
    }

    #[tokio::test]
    async fn test_run_follows_commit_watch() {
        let log = Arc::new(MemoryLog::new());
        let applier = CommitApplier::new(1, log.clone());
        let last_applied = applier.last_applied();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(applier.run(shutdown.clone()));

        log.append(command("create-topic"), LogChangeReason::Client);
        log.commit(1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while last_applied.load(Ordering::SeqCst) < 1 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        handle.await.unwrap();
    }
}

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};

use crate::log::{Entry, LogChangeReason, RaftLog};

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    commit_index: u64,
    /// Commit waiters keyed by the index they wait for
    waiters: BTreeMap<u64, Vec<oneshot::Sender<u64>>>,
}

impl Inner {
    fn last_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn get(&self, index: u64) -> Option<&Entry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }
}

/// In-memory log. All state sits behind one mutex that is never held across an
/// await point.
#[derive(Debug)]
pub struct MemoryLog {
    inner: Mutex<Inner>,
    appends: watch::Sender<u64>,
    commits: watch::Sender<u64>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        let (appends, _) = watch::channel(0);
        let (commits, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            appends,
            commits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RaftLog for MemoryLog {
    fn append(&self, mut entry: Entry, reason: LogChangeReason) -> u64 {
        let index = {
            let mut inner = self.lock();
            let index = inner.last_index() + 1;
            entry.index = index;
            tracing::trace!(index, term = entry.term, %reason, "Appended entry");
            inner.entries.push(entry);
            index
        };
        self.appends.send_replace(index);
        index
    }

    fn last_index(&self) -> u64 {
        self.lock().last_index()
    }

    fn last_term(&self) -> u64 {
        self.lock().entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.lock().get(index).map(|e| e.term)
    }

    fn entry(&self, index: u64) -> Option<Entry> {
        self.lock().get(index).cloned()
    }

    fn entries_from(&self, index: u64, max: usize) -> Vec<Entry> {
        let inner = self.lock();
        let start = index.max(1) as usize - 1;
        if start >= inner.entries.len() {
            return Vec::new();
        }
        inner.entries[start..].iter().take(max).cloned().collect()
    }

    fn truncate_from(&self, index: u64) {
        let last = {
            let mut inner = self.lock();
            if index <= inner.commit_index {
                tracing::error!(
                    index,
                    commit_index = inner.commit_index,
                    "Refusing to truncate committed entries"
                );
                return;
            }
            if index > inner.last_index() {
                return;
            }
            inner.entries.truncate((index - 1) as usize);
            // Waiters on removed entries will never see a commit
            let _dropped = inner.waiters.split_off(&index);
            inner.last_index()
        };
        tracing::debug!(from = index, new_last_index = last, "Truncated log");
        self.appends.send_replace(last);
    }

    fn commit_index(&self) -> u64 {
        self.lock().commit_index
    }

    fn commit(&self, index: u64) {
        let (committed, ready) = {
            let mut inner = self.lock();
            let target = index.min(inner.last_index());
            if target <= inner.commit_index {
                return;
            }
            inner.commit_index = target;
            let pending = inner.waiters.split_off(&(target + 1));
            let ready = std::mem::replace(&mut inner.waiters, pending);
            (target, ready)
        };

        for sender in ready.into_values().flatten() {
            let _ = sender.send(committed);
        }
        self.commits.send_replace(committed);
    }

    fn wait_for_commit(&self, index: u64) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        if index <= inner.commit_index {
            let _ = tx.send(inner.commit_index);
        } else {
            inner.waiters.entry(index).or_default().push(tx);
        }
        rx
    }

    fn subscribe_appends(&self) -> watch::Receiver<u64> {
        self.appends.subscribe()
    }

    fn subscribe_commits(&self) -> watch::Receiver<u64> {
        self.commits.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{Payload, SYSTEM_NAMESPACE};

    fn command(term: u64, key: &str) -> Entry {
        let mut payload = Payload::new();
        payload.insert("command".to_string(), key.to_string());
        Entry::new(term, 1, SYSTEM_NAMESPACE, payload)
    }

    #[test]
    fn test_append_assigns_sequential_indices() {
        let log = MemoryLog::new();
        assert_eq!(log.append(Entry::noop(1, 1), LogChangeReason::Leadership), 1);
        assert_eq!(log.append(command(1, "a"), LogChangeReason::Client), 2);
        assert_eq!(log.append(command(2, "b"), LogChangeReason::Client), 3);

        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.entry(2).unwrap().payload["command"], "a");
        assert!(log.entry(0).is_none());
        assert!(log.entry(4).is_none());
    }

    #[test]
    fn test_term_at() {
        let log = MemoryLog::new();
        log.append(command(1, "a"), LogChangeReason::Client);
        log.append(command(3, "b"), LogChangeReason::Client);

        assert_eq!(log.term_at(0), Some(0));
        assert_eq!(log.term_at(1), Some(1));
        assert_eq!(log.term_at(2), Some(3));
        assert_eq!(log.term_at(3), None);
    }

    #[test]
    fn test_entries_from_respects_max() {
        let log = MemoryLog::new();
        for _ in 0..5 {
            log.append(command(1, "x"), LogChangeReason::Client);
        }

        let entries = log.entries_from(2, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 2);
        assert_eq!(entries[1].index, 3);

        assert_eq!(log.entries_from(0, 100).len(), 5);
        assert!(log.entries_from(6, 10).is_empty());
    }

    #[test]
    fn test_truncate_keeps_committed_prefix() {
        let log = MemoryLog::new();
        for _ in 0..4 {
            log.append(command(1, "x"), LogChangeReason::Client);
        }
        log.commit(2);

        log.truncate_from(2);
        assert_eq!(log.last_index(), 4, "committed entries must survive");

        log.truncate_from(3);
        assert_eq!(log.last_index(), 2);

        let index = log.append(command(2, "y"), LogChangeReason::Replication);
        assert_eq!(index, 3);
        assert_eq!(log.term_at(3), Some(2));
    }

    #[test]
    fn test_commit_never_regresses_or_overshoots() {
        let log = MemoryLog::new();
        log.append(command(1, "a"), LogChangeReason::Client);
        log.append(command(1, "b"), LogChangeReason::Client);

        log.commit(10);
        assert_eq!(log.commit_index(), 2);

        log.commit(1);
        assert_eq!(log.commit_index(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_commit_fires_once_committed() {
        let log = MemoryLog::new();
        let index = log.append(command(1, "a"), LogChangeReason::Client);
        let mut rx = log.wait_for_commit(index);

        assert!(rx.try_recv().is_err());
        log.commit(index);
        assert_eq!(rx.await.unwrap(), 1);

        // Already-committed index resolves immediately
        assert_eq!(log.wait_for_commit(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_commit_dropped_on_truncate() {
        let log = MemoryLog::new();
        log.append(command(1, "a"), LogChangeReason::Client);
        let index = log.append(command(1, "b"), LogChangeReason::Client);
        let rx = log.wait_for_commit(index);

        log.truncate_from(index);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_watches_track_appends_and_commits() {
        let log = MemoryLog::new();
        let mut appends = log.subscribe_appends();
        let mut commits = log.subscribe_commits();

        log.append(command(1, "a"), LogChangeReason::Client);
        appends.changed().await.unwrap();
        assert_eq!(*appends.borrow(), 1);

        log.commit(1);
        commits.changed().await.unwrap();
        assert_eq!(*commits.borrow(), 1);
    }
}

//! Typed facade over the replicated log.
//!
//! The consensus core only talks to storage through [`RaftLog`]: it appends
//! entries, asks for positions and terms, and waits on commit notifications.
//! [`MemoryLog`] is the in-process implementation every node uses.

pub mod memory;

use std::collections::BTreeMap;

use tokio::sync::{oneshot, watch};

pub use memory::MemoryLog;

/// Namespace that carries cluster-level commands (topic creation, etc.)
pub const SYSTEM_NAMESPACE: &str = "@system";

/// Serialized application command: a flat set of key/value pairs.
pub type Payload = BTreeMap<String, String>;

/// A single record of the replicated log.
///
/// `index` is assigned by the log on append; entries built by callers carry 0
/// until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub term: u64,
    pub leader_id: u64,
    pub index: u64,
    pub namespace: String,
    pub payload: Payload,
}

impl Entry {
    pub fn new(term: u64, leader_id: u64, namespace: impl Into<String>, payload: Payload) -> Self {
        Self {
            term,
            leader_id,
            index: 0,
            namespace: namespace.into(),
            payload,
        }
    }

    /// Empty entry a new leader writes to claim its term in the log
    pub fn noop(term: u64, leader_id: u64) -> Self {
        Self::new(term, leader_id, SYSTEM_NAMESPACE, Payload::new())
    }

    pub fn is_noop(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Why an entry was written, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChangeReason {
    /// Leader appending a client command
    Client,
    /// Follower copying entries from the leader
    Replication,
    /// Leader's no-op on accession
    Leadership,
}

impl std::fmt::Display for LogChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogChangeReason::Client => write!(f, "client"),
            LogChangeReason::Replication => write!(f, "replication"),
            LogChangeReason::Leadership => write!(f, "leadership"),
        }
    }
}

/// Storage interface consumed by the consensus core. Indices are 1-based; index
/// 0 is the empty prefix with term 0.
pub trait RaftLog: Send + Sync {
    /// Append at `last_index() + 1` and return the assigned index.
    fn append(&self, entry: Entry, reason: LogChangeReason) -> u64;

    fn last_index(&self) -> u64;

    fn last_term(&self) -> u64;

    /// Term of the entry at `index`, `Some(0)` for index 0, `None` past the end.
    fn term_at(&self, index: u64) -> Option<u64>;

    fn entry(&self, index: u64) -> Option<Entry>;

    /// Up to `max` entries starting at `index` (inclusive).
    fn entries_from(&self, index: u64, max: usize) -> Vec<Entry>;

    /// Drop every entry at or after `index`. Committed entries are never removed.
    fn truncate_from(&self, index: u64);

    fn commit_index(&self) -> u64;

    /// Advance the commit index (never backwards, never past the last entry).
    fn commit(&self, index: u64);

    /// Resolves with the commit index once `index` is committed. The sender is
    /// dropped if the entry is truncated before that happens.
    fn wait_for_commit(&self, index: u64) -> oneshot::Receiver<u64>;

    /// Watch on `last_index()`, bumped on every append or truncation.
    fn subscribe_appends(&self) -> watch::Receiver<u64>;

    /// Watch on `commit_index()`.
    fn subscribe_commits(&self) -> watch::Receiver<u64>;
}

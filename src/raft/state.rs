/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Election state of a node.
///
/// # Invariants
///
/// - `current_term` never decreases. Every `become_*` method either keeps it or
///   raises it.
/// - `voted_for` is only meaningful within `current_term` and is cleared
///   whenever the term advances.
/// - At most one vote is cast per term: once `voted_for` is set it only changes
///   when the term changes.
///
/// Only the role state machine in [`crate::raft::Raft`] mutates this struct;
/// everything else reads snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftContext {
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub role: RaftRole,
    /// Known leader for `current_term`, if any
    pub leader_id: Option<u64>,
}

impl RaftContext {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            role: RaftRole::Follower,
            leader_id: None,
        }
    }

    /// Move to `term` if it is newer, forgetting the vote and leader of the old
    /// term. Returns whether the term changed.
    pub fn observe_term(&mut self, term: u64) -> bool {
        if term <= self.current_term {
            return false;
        }
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = None;
        true
    }

    /// Transition to follower state. A lower `term` never rolls the context back.
    pub fn become_follower(&mut self, term: u64) {
        self.observe_term(term);
        self.role = RaftRole::Follower;
    }

    /// Transition to candidate state: start a new term and vote for ourselves
    pub fn become_candidate(&mut self, my_id: u64) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(my_id);
        self.leader_id = None;
    }

    /// Transition to leader state
    pub fn become_leader(&mut self, my_id: u64) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(my_id);
    }
}

impl Default for RaftContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a candidate's log is at least as up-to-date as ours
pub fn is_log_up_to_date(
    our_last_index: u64,
    our_last_term: u64,
    last_log_index: u64,
    last_log_term: u64,
) -> bool {
    last_log_term > our_last_term
        || (last_log_term == our_last_term && last_log_index >= our_last_index)
}

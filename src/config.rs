use std::net::SocketAddr;
use std::time::Duration;

use crate::client::OpCategory;
use crate::raft::RaftRole;

/// Which client operation categories each Raft role admits.
///
/// Reads are not served by followers unless explicitly enabled, since a
/// follower may lag the leader arbitrarily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpPolicy {
    pub leader: Vec<OpCategory>,
    pub follower: Vec<OpCategory>,
    pub candidate: Vec<OpCategory>,
}

impl Default for OpPolicy {
    fn default() -> Self {
        Self {
            leader: vec![OpCategory::Read, OpCategory::Write],
            follower: Vec::new(),
            candidate: Vec::new(),
        }
    }
}

impl OpPolicy {
    pub fn supported(&self, role: RaftRole) -> &[OpCategory] {
        match role {
            RaftRole::Leader => &self.leader,
            RaftRole::Follower => &self.follower,
            RaftRole::Candidate => &self.candidate,
        }
    }

    pub fn allows(&self, role: RaftRole, op: OpCategory) -> bool {
        self.supported(role).contains(&op)
    }

    /// Let followers answer reads locally.
    pub fn with_follower_reads(mut self) -> Self {
        if !self.follower.contains(&OpCategory::Read) {
            self.follower.push(OpCategory::Read);
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: u64,
    pub listen_addr: SocketAddr,
    pub peers: Vec<PeerConfig>,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Idle cadence of the leader's AppendEntries to each peer
    pub heartbeat_interval_ms: u64,
    /// Wait before retrying a peer after a failed dispatch
    pub replication_backoff_ms: u64,
    /// Upper bound on a single peer RPC
    pub rpc_timeout_ms: u64,
    /// Period of the pending-command expiry sweep
    pub bundle_sweep_interval_ms: u64,
    pub max_entries_per_append: usize,
    pub default_command_timeout_ms: u64,
    pub op_policy: OpPolicy,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub node_id: u64,
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9191)),
            peers: Vec::new(),
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            replication_backoff_ms: 100,
            rpc_timeout_ms: 1000,
            bundle_sweep_interval_ms: 500,
            max_entries_per_append: 64,
            default_command_timeout_ms: 5000,
            op_policy: OpPolicy::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: u64, listen_addr: SocketAddr) -> Self {
        Self {
            node_id,
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, node_id: u64, addr: String) -> Self {
        self.peers.push(PeerConfig { node_id, addr });
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn replication_backoff(&self) -> Duration {
        Duration::from_millis(self.replication_backoff_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn bundle_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.bundle_sweep_interval_ms)
    }

    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_millis(self.default_command_timeout_ms)
    }
}

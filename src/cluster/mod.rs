//! Static cluster membership and peer messaging.

pub mod messenger;
pub mod pool;

use crate::config::NodeConfig;

pub use messenger::ClusterMessenger;
pub use pool::{ConnectionPool, GrpcPeerChannel, PeerChannel};

/// Identity of a cluster member
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    id: u64,
    addr: String,
}

impl Node {
    pub fn new(id: u64, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}@{}", self.id, self.addr)
    }
}

/// The local node plus every member of the cluster, ordered by id.
///
/// Membership is fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSet {
    local: Node,
    nodes: Vec<Node>,
}

impl ClusterSet {
    /// Build a set from the local node and its peers. Duplicate ids keep the
    /// first occurrence, with the local node taking precedence.
    pub fn new(local: Node, peers: impl IntoIterator<Item = Node>) -> Self {
        let mut nodes = vec![local.clone()];
        for peer in peers {
            if !nodes.iter().any(|n| n.id == peer.id) {
                nodes.push(peer);
            }
        }
        nodes.sort_by_key(|n| n.id);
        Self { local, nodes }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        let local = Node::new(config.node_id, config.listen_addr.to_string());
        let peers = config
            .peers
            .iter()
            .map(|p| Node::new(p.node_id, p.addr.clone()));
        Self::new(local, peers)
    }

    pub fn local_node(&self) -> &Node {
        &self.local
    }

    /// All members, local node included
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All members except the local node
    pub fn peers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.id != self.local.id)
    }

    pub fn get(&self, node_id: u64) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Votes or acknowledgements needed for a decision, counting the local node
    pub fn majority(&self) -> usize {
        self.nodes.len() / 2 + 1
    }
}

impl std::fmt::Display for ClusterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.nodes.iter().map(|n| n.id.to_string()).collect();
        write!(f, "[{}] (local {})", ids.join(", "), self.local.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> ClusterSet {
        ClusterSet::new(
            Node::new(2, "127.0.0.1:9192"),
            vec![Node::new(3, "127.0.0.1:9193"), Node::new(1, "127.0.0.1:9191")],
        )
    }

    #[test]
    fn test_nodes_are_ordered_and_include_local() {
        let cluster = three_nodes();
        let ids: Vec<u64> = cluster.nodes().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(cluster.local_node().id(), 2);
        assert_eq!(cluster.size(), 3);
    }

    #[test]
    fn test_peers_exclude_local() {
        let cluster = three_nodes();
        let peers: Vec<u64> = cluster.peers().map(|n| n.id()).collect();
        assert_eq!(peers, vec![1, 3]);
    }

    #[test]
    fn test_duplicate_ids_are_ignored() {
        let cluster = ClusterSet::new(
            Node::new(1, "a:1"),
            vec![Node::new(1, "b:1"), Node::new(2, "c:2"), Node::new(2, "d:2")],
        );
        assert_eq!(cluster.size(), 2);
        assert_eq!(cluster.get(1).unwrap().addr(), "a:1");
        assert_eq!(cluster.get(2).unwrap().addr(), "c:2");
    }

    #[test]
    fn test_majority() {
        assert_eq!(ClusterSet::new(Node::new(1, "a"), vec![]).majority(), 1);
        assert_eq!(three_nodes().majority(), 2);
        let five = ClusterSet::new(Node::new(1, "a"), (2..=5).map(|i| Node::new(i, "x")));
        assert_eq!(five.majority(), 3);
    }

    #[test]
    fn test_from_config() {
        let config = NodeConfig::new(1, "127.0.0.1:9191".parse().unwrap())
            .with_peer(2, "127.0.0.1:9192".to_string())
            .with_peer(3, "127.0.0.1:9193".to_string());
        let cluster = ClusterSet::from_config(&config);
        assert_eq!(cluster.local_node(), &Node::new(1, "127.0.0.1:9191"));
        assert_eq!(cluster.peers().count(), 2);
        assert_eq!(cluster.to_string(), "[1, 2, 3] (local 1)");
    }
}

//! Integration tests for multi-node replication and command admission.
//!
//! These tests verify log replication, commit application, and the
//! invariants that must hold while leadership moves around the cluster.


use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quorum_lite::client::{ClientAck, Command};
use quorum_lite::config::OpPolicy;
use quorum_lite::log::RaftLog;
use quorum_lite::raft::RaftRole;
use test_harness::{assert_eventually, TestCluster};

/// Test 1: A new leader claims its term with a no-op that reaches every peer
#[tokio::test]
async fn test_leader_noop_replicated_to_all() {
    let mut cluster = TestCluster::new(3).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    let leader = cluster.get_node(leader_id).unwrap();
    let term = leader.current_term();

    // First entry of the leader's term sits right after whatever it held before
    let noop_index = (1..=leader.log.last_index())
        .find(|&index| leader.log.term_at(index) == Some(term))
        .expect("Leader should have written an entry in its term");
    let noop = leader.log.entry(noop_index).unwrap();
    assert!(noop.is_noop());
    assert_eq!(noop.leader_id, leader_id);
    assert_eq!(noop.index, noop_index);

    assert_eventually(
        || async {
            cluster
                .nodes
                .values()
                .all(|node| node.log.term_at(noop_index) == Some(term))
        },
        Duration::from_secs(2),
        "No-op should be replicated to every follower",
    )
    .await;
    assert!(
        cluster
            .wait_for_commit_on_all(noop_index, Duration::from_secs(2))
            .await
    );

    cluster.shutdown().await;
}

/// Test 2: Commands commit on every node and are applied in the same order
#[tokio::test]
async fn test_commands_replicate_and_apply_on_all() {
    let mut cluster = TestCluster::new(3).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");

    for topic in ["orders", "payments", "shipments"] {
        cluster
            .submit("create-topic", &[("name", topic), ("partitions", "3")])
            .await
            .expect("Command should commit");
    }

    let committed = cluster.get_node(leader_id).unwrap().commit_index();
    assert!(
        cluster
            .wait_for_commit_on_all(committed, Duration::from_secs(2))
            .await,
        "All nodes should reach the leader's commit index"
    );
    assert_eventually(
        || async {
            cluster
                .nodes
                .values()
                .all(|node| node.last_applied.load(Ordering::SeqCst) >= committed)
        },
        Duration::from_secs(2),
        "All nodes should apply what they committed",
    )
    .await;
    assert!(cluster.committed_prefixes_match());

    // Commands come back out of the log in submission order
    let leader = cluster.get_node(leader_id).unwrap();
    let topics: Vec<String> = leader
        .log
        .entries_from(1, committed as usize)
        .iter()
        .filter_map(|entry| Command::from_payload(&entry.payload))
        .filter_map(|command| {
            command
                .args()
                .iter()
                .find(|(arg, _)| arg == "name")
                .map(|(_, param)| param.clone())
        })
        .collect();
    assert_eq!(topics, vec!["orders", "payments", "shipments"]);

    cluster.shutdown().await;
}

/// Test 3: Status reflects the role and the single running replicator
#[tokio::test]
async fn test_status_reports_roles() {
    let mut cluster = TestCluster::new(3).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");

    let leader = cluster.get_node(leader_id).unwrap();
    // The replicator starts just after the role flips
    assert_eventually(
        || async { leader.raft.active_replicators() == 1 },
        Duration::from_secs(1),
        "Leader should run one replicator",
    )
    .await;
    let status = leader.raft.status();
    assert_eq!(status.role, "leader");
    assert_eq!(status.leader_id, Some(leader_id));
    assert_eq!(status.voted_for, Some(leader_id));
    assert_eq!(status.active_replicators, 1);

    for node in cluster.nodes.values().filter(|n| n.node_id != leader_id) {
        let status = node.raft.status();
        assert_eq!(status.role, "follower");
        assert_eq!(status.active_replicators, 0);
    }

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["node_id"], leader_id);
    assert_eq!(json["role"], "leader");

    cluster.shutdown().await;
}

/// Test 4: Terms only move forward and no node runs two replicators, even
/// while leaders keep failing
#[tokio::test]
async fn test_terms_monotonic_and_single_replicator_under_churn() {
    let mut cluster = TestCluster::new(5).await;

    let mut role_changes: HashMap<u64, _> = cluster
        .nodes
        .values()
        .map(|node| (node.node_id, node.raft.subscribe_role_changes()))
        .collect();
    let mut last_terms: HashMap<u64, u64> = HashMap::new();

    for _round in 0..2 {
        let leader_id = cluster
            .wait_for_leader(Duration::from_secs(5))
            .await
            .expect("Leader should be elected");

        // Sample while the cluster settles
        for _ in 0..20 {
            for node in cluster.nodes.values() {
                assert!(
                    node.raft.active_replicators() <= 1,
                    "Node {} runs more than one replicator",
                    node.node_id
                );
                let term = node.current_term();
                let previous = last_terms.insert(node.node_id, term).unwrap_or(0);
                assert!(term >= previous, "Node {} term went backwards", node.node_id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cluster.shutdown_node(leader_id);
        role_changes.remove(&leader_id);
        cluster
            .wait_for_new_leader(leader_id, Duration::from_secs(5))
            .await
            .expect("Replacement leader should be elected");
    }

    for (node_id, rx) in role_changes.iter_mut() {
        let mut previous = 0;
        while let Ok(change) = rx.try_recv() {
            assert!(
                change.term >= previous,
                "Node {} published a role change for an older term",
                node_id
            );
            previous = change.term;
        }
    }

    for (term, leaders) in cluster.leaders_by_term() {
        assert_eq!(leaders.len(), 1, "Term {} has more than one leader", term);
    }

    cluster.shutdown().await;
}

/// Test 5: Follower reads can be enabled while writes stay on the leader
#[tokio::test]
async fn test_follower_reads_policy() {
    let mut cluster = TestCluster::with_policy(3, OpPolicy::default().with_follower_reads()).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    let follower = cluster
        .nodes
        .values()
        .find(|node| node.node_id != leader_id && node.role() == RaftRole::Follower)
        .expect("Should have a follower");

    // Reads are answered from the follower's own state
    let ack = follower
        .submit("describe-topic", &[("name", "orders")], Duration::from_millis(200))
        .await;
    assert!(ack.is_ok(), "Follower should serve reads: {:?}", ack);
    assert_eq!(follower.receiver.pending(), 0);
    let leader = cluster.get_node(leader_id).unwrap();
    let logged = leader
        .log
        .entries_from(1, usize::MAX)
        .iter()
        .any(|entry| entry.payload.get("command").map(String::as_str) == Some("describe-topic"));
    assert!(!logged, "Local reads must not go through the log");

    let ack = follower
        .submit("create-topic", &[("name", "orders")], Duration::from_millis(200))
        .await;
    assert_eq!(
        ack,
        ClientAck::Error(quorum_lite::client::receiver::UNSUPPORTED_MESSAGE.to_string())
    );

    cluster.shutdown().await;
}

//! Network partition tests for Raft cluster behavior.
//!
//! These tests verify correct behavior when the network is partitioned:
//! majority elects leader, minority cannot, a deposed leader fails its pending
//! commands, and logs converge after healing.


use std::time::Duration;

use quorum_lite::client::receiver::{TIMEOUT_MESSAGE, UNSUPPORTED_MESSAGE};
use quorum_lite::client::{ClientAck, Command, CommandBundle, OpCategory};
use quorum_lite::log::RaftLog;
use quorum_lite::raft::RaftRole;
use test_harness::{assert_eventually, TestCluster};

fn write(topic: &str, timeout: Duration) -> (CommandBundle, tokio::sync::oneshot::Receiver<ClientAck>) {
    let command = Command::new("create-topic", vec![("name".to_string(), topic.to_string())]).unwrap();
    CommandBundle::new(command, OpCategory::Write, timeout)
}

/// Split a 5-node cluster so the current leader ends up alone with one follower
fn minority_with(leader_id: u64) -> (Vec<u64>, Vec<u64>) {
    let others: Vec<u64> = (1..=5u64).filter(|&id| id != leader_id).collect();
    let minority = vec![leader_id, others[0]];
    let majority = others[1..].to_vec();
    (minority, majority)
}

/// Test 1: Majority partition elects a leader, the minority never does
#[tokio::test]
async fn test_majority_partition_elects_leader() {
    let mut cluster = TestCluster::new(5).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Initial leader should be elected");
    let (minority, majority) = minority_with(leader_id);
    cluster.create_partition(&minority, &majority);

    let new_leader = cluster
        .wait_for_leader_in_group(&majority, Duration::from_secs(5))
        .await
        .expect("Majority partition should elect a leader");
    assert!(majority.contains(&new_leader));

    // The follower stranded with the old leader can never win an election
    let stranded = minority[1];
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_ne!(cluster.get_node(stranded).unwrap().role(), RaftRole::Leader);

    cluster.shutdown().await;
}

/// Test 2: A leader cut off from the majority cannot commit; its client
/// commands time out exactly once
#[tokio::test]
async fn test_isolated_leader_times_out_commands() {
    let mut cluster = TestCluster::new(3).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    cluster.isolate_node(leader_id);

    let leader = cluster.get_node(leader_id).unwrap();
    let commit_before = leader.commit_index();
    let ack = leader
        .submit("create-topic", &[("name", "orders")], Duration::from_millis(150))
        .await;

    // Still leader (nobody told it otherwise), but nothing committed
    if leader.is_leader() {
        assert_eq!(ack, ClientAck::Error(TIMEOUT_MESSAGE.to_string()));
    } else {
        assert_eq!(ack, ClientAck::Error(UNSUPPORTED_MESSAGE.to_string()));
    }
    assert_eq!(leader.commit_index(), commit_before);
    assert_eq!(leader.receiver.pending(), 0);

    cluster.shutdown().await;
}

/// Test 3: When a partitioned leader learns of a newer term, its pending
/// writes fail right away instead of waiting for their deadlines
#[tokio::test]
async fn test_deposed_leader_rejects_pending_writes() {
    let mut cluster = TestCluster::new(3).await;

    let old_leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    cluster.isolate_node(old_leader);

    let receiver = cluster.get_node(old_leader).unwrap().receiver.clone();
    let (first, rx1) = write("orders", Duration::from_secs(30));
    let (second, rx2) = write("payments", Duration::from_secs(30));
    receiver.receive(first).await;
    receiver.receive(second).await;
    assert_eq!(receiver.pending(), 2);

    let new_leader = cluster
        .wait_for_new_leader(old_leader, Duration::from_secs(5))
        .await
        .expect("Remaining nodes should elect a new leader");
    assert_ne!(new_leader, old_leader);

    let healed_at = tokio::time::Instant::now();
    cluster.heal_node(old_leader);

    for rx in [rx1, rx2] {
        let ack = tokio::time::timeout(Duration::from_secs(3), rx)
            .await
            .expect("Pending write should resolve promptly")
            .unwrap();
        assert_eq!(ack, ClientAck::Error(UNSUPPORTED_MESSAGE.to_string()));
    }
    assert!(healed_at.elapsed() < Duration::from_secs(5));
    assert_eq!(receiver.pending(), 0);
    assert_eq!(
        cluster.get_node(old_leader).unwrap().role(),
        RaftRole::Follower
    );

    cluster.shutdown().await;
}

/// Test 4: After healing, the deposed leader's uncommitted entries are
/// replaced and every log agrees
#[tokio::test]
async fn test_logs_converge_after_heal() {
    let mut cluster = TestCluster::new(3).await;

    let old_leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    cluster
        .submit("create-topic", &[("name", "before")])
        .await
        .expect("Command should commit before the partition");

    cluster.isolate_node(old_leader);
    // Lands only in the old leader's log
    let stale = cluster
        .get_node(old_leader)
        .unwrap()
        .submit("create-topic", &[("name", "stale")], Duration::from_millis(100))
        .await;
    assert!(!stale.is_ok());

    let new_leader = cluster
        .wait_for_new_leader(old_leader, Duration::from_secs(5))
        .await
        .expect("Remaining nodes should elect a new leader");
    let fresh = cluster
        .get_node(new_leader)
        .unwrap()
        .submit("create-topic", &[("name", "fresh")], Duration::from_secs(2))
        .await;
    assert!(fresh.is_ok(), "Majority side should commit: {:?}", fresh);

    cluster.heal_node(old_leader);
    let target = cluster.get_node(new_leader).unwrap().commit_index();
    assert!(
        cluster
            .wait_for_commit_on_all(target, Duration::from_secs(5))
            .await,
        "Healed node should catch up"
    );
    assert_eventually(
        || async { cluster.committed_prefixes_match() },
        Duration::from_secs(2),
        "Logs should agree after healing",
    )
    .await;

    let old = cluster.get_node(old_leader).unwrap();
    let names: Vec<String> = old
        .log
        .entries_from(1, old.commit_index() as usize)
        .into_iter()
        .filter_map(|entry| entry.payload.get("name").cloned())
        .collect();
    assert!(names.contains(&"fresh".to_string()));
    assert!(!names.contains(&"stale".to_string()));

    cluster.shutdown().await;
}

/// Test 5: A minority that heals back in never disturbs the majority's leader
/// term ordering
#[tokio::test]
async fn test_single_leader_per_term_across_partitions() {
    let mut cluster = TestCluster::new(5).await;

    for _ in 0..2 {
        let leader_id = cluster
            .wait_for_leader(Duration::from_secs(5))
            .await
            .expect("Leader should be elected");
        let (minority, majority) = minority_with(leader_id);
        cluster.create_partition(&minority, &majority);
        cluster
            .wait_for_leader_in_group(&majority, Duration::from_secs(5))
            .await
            .expect("Majority should elect a leader");

        // Two nodes may both say "leader" here, but never for the same term
        for (term, leaders) in cluster.leaders_by_term() {
            assert_eq!(leaders.len(), 1, "Term {} has more than one leader", term);
        }
        for node in cluster.nodes.values() {
            assert!(node.raft.active_replicators() <= 1);
        }

        cluster.heal_partition(&minority, &majority);
        assert_eventually(
            || async { cluster.count_leaders() == 1 },
            Duration::from_secs(5),
            "Healed cluster should settle on one leader",
        )
        .await;
    }

    cluster.shutdown().await;
}

mod common;

use bytes::Bytes;
use common::{command, Cluster};
use raft_core::StartError;
use tokio::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn basic_agreement() {
    let cluster = Cluster::new(3);

    for n in 1..=3 {
        let (count, _) = cluster.n_committed(n);
        assert_eq!(0, count, "some member committed before start()");

        let index = cluster.one(command(n as usize), 3, false).await;
        assert_eq!(n, index, "got index {} but expected {}", index, n);
    }

    cluster.assert_no_apply_errors();
}

#[tokio::test(flavor = "multi_thread")]
async fn start_on_follower_is_rejected_with_hint() {
    let cluster = Cluster::new(3);

    let leader = cluster.check_one_leader().await;
    cluster.one(command(1), 3, false).await;

    let follower = (leader + 1) % 3;
    match cluster.node(follower).start(command(2)).await {
        Err(StartError::NotLeader {
            current_term,
            leader_hint,
        }) => {
            let (leader_term, _) = cluster.node(leader).get_state();
            assert_eq!(leader_term, current_term);
            assert_eq!(Some(cluster.node(leader).id()), leader_hint);
        }
        other => panic!("expected NotLeader, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn agreement_despite_follower_disconnect() {
    let cluster = Cluster::new(3);

    cluster.one(command(101), 3, false).await;

    let leader = cluster.check_one_leader().await;
    cluster.disconnect((leader + 1) % 3);

    // The other two can still commit.
    cluster.one(command(102), 2, false).await;
    cluster.one(command(103), 2, false).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    cluster.one(command(104), 2, false).await;
    cluster.one(command(105), 2, false).await;

    // The follower catches up once it's back.
    cluster.connect((leader + 1) % 3);
    cluster.one(command(106), 3, true).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    cluster.one(command(107), 3, true).await;

    cluster.assert_no_apply_errors();
}

#[tokio::test(flavor = "multi_thread")]
async fn no_agreement_without_majority() {
    let cluster = Cluster::new(5);

    cluster.one(command(10), 5, false).await;

    // Leave the leader with a single follower.
    let leader = cluster.check_one_leader().await;
    cluster.disconnect((leader + 1) % 5);
    cluster.disconnect((leader + 2) % 5);
    cluster.disconnect((leader + 3) % 5);

    let entry_id = cluster.node(leader).start(command(20)).await.expect("leader rejected start");
    assert_eq!(2, entry_id.index);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let (count, _) = cluster.n_committed(entry_id.index);
    assert_eq!(0, count, "{} committed without a majority", count);

    // Heal the partition. Whoever leads now must be able to commit.
    cluster.connect((leader + 1) % 5);
    cluster.connect((leader + 2) % 5);
    cluster.connect((leader + 3) % 5);

    let leader2 = cluster.check_one_leader().await;
    let index = loop {
        match cluster.node(leader2).start(command(30)).await {
            Ok(entry_id) => break entry_id.index,
            Err(StartError::NotLeader { .. }) => tokio::time::sleep(Duration::from_millis(50)).await,
            Err(e) => panic!("start failed: {}", e),
        }
    };
    assert!((2..=3).contains(&index), "unexpected index {}", index);

    cluster.one(command(1000), 5, true).await;
    cluster.assert_no_apply_errors();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts() {
    let cluster = Cluster::new(3);

    let leader = cluster.check_one_leader().await;
    let node = cluster.node(leader).clone();

    let mut tasks = Vec::new();
    for n in 0..5 {
        let node = node.clone();
        tasks.push(tokio::spawn(async move { node.start(command(100 + n)).await }));
    }

    let mut indexes = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(entry_id) => indexes.push(entry_id.index),
            Err(e) => panic!("concurrent start failed: {}", e),
        }
    }
    indexes.sort_unstable();
    assert_eq!(vec![1, 2, 3, 4, 5], indexes);

    for index in indexes {
        assert!(cluster.wait(index, 3).await.is_some(), "index {} never committed", index);
    }
    cluster.assert_no_apply_errors();
}

#[tokio::test(flavor = "multi_thread")]
async fn isolated_leader_entries_are_overwritten() {
    let cluster = Cluster::new(3);

    cluster.one(command(101), 3, true).await;

    // Leader 1 gets cut off with some entries nobody else has.
    let leader1 = cluster.check_one_leader().await;
    cluster.disconnect(leader1);
    for n in 102..105 {
        let _ = cluster.node(leader1).start(command(n)).await;
    }

    // The other two move on without it.
    cluster.one(command(103), 2, true).await;

    // Leader 2 gets cut off too, and leader 1 comes back.
    let leader2 = cluster.check_one_leader().await;
    cluster.disconnect(leader2);
    cluster.connect(leader1);

    // Leader 1 can't win with its stale log, so the third member leads. Leader 1's
    // uncommitted entries get replaced.
    cluster.one(command(104), 2, true).await;

    cluster.connect(leader2);
    cluster.one(command(105), 3, true).await;
    cluster.assert_no_apply_errors();
}

#[tokio::test(flavor = "multi_thread")]
async fn leader_backs_up_over_long_divergent_logs() {
    let cluster = Cluster::new(5);

    cluster.one(command(1), 5, true).await;

    // Put the leader and one follower in a minority, and give them lots of entries that will
    // never commit.
    let leader1 = cluster.check_one_leader().await;
    cluster.disconnect((leader1 + 2) % 5);
    cluster.disconnect((leader1 + 3) % 5);
    cluster.disconnect((leader1 + 4) % 5);
    for n in 0..50 {
        let _ = cluster.node(leader1).start(command(1000 + n)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The majority side commits its own entries.
    cluster.disconnect(leader1);
    cluster.disconnect((leader1 + 1) % 5);
    cluster.connect((leader1 + 2) % 5);
    cluster.connect((leader1 + 3) % 5);
    cluster.connect((leader1 + 4) % 5);
    for n in 0..50 {
        cluster.one(command(2000 + n), 3, true).await;
    }

    // Everyone back. The minority's divergent suffix is thrown away.
    for i in 0..5 {
        cluster.connect(i);
    }
    cluster.one(command(3000), 5, true).await;
    cluster.assert_no_apply_errors();
}

#[tokio::test(flavor = "multi_thread")]
async fn agreement_on_unreliable_network() {
    let cluster = Cluster::new(5);
    cluster.network.set_unreliable(true);

    for n in 1..30 {
        cluster.one(command(n), 1, true).await;
    }

    cluster.network.set_unreliable(false);
    cluster.one(command(100), 5, true).await;
    cluster.assert_no_apply_errors();
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeats_stay_cheap() {
    let cluster = Cluster::new(3);
    cluster.check_one_leader().await;

    let before = cluster.network.rpc_count();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let idle_rpcs = cluster.network.rpc_count() - before;

    // 50ms heartbeats to 2 peers is ~40 per second. Allow slack for a re-election.
    assert!(idle_rpcs < 100, "{} RPCs in 1s of idle", idle_rpcs);

    cluster.one(Bytes::from_static(b"after idle"), 3, false).await;
}

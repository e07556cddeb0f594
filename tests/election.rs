mod common;

use common::{Cluster, ELECTION_MIN_TIMEOUT};
use raft_core::Role;
use rand::seq::SliceRandom;
use tokio::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn initial_election() {
    let cluster = Cluster::new(3);

    cluster.check_one_leader().await;

    // Let any in-flight votes settle, then everyone should agree on the term.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let term1 = cluster.check_terms();
    assert!(term1 >= 1, "term is {}, but should be at least 1", term1);

    // Nothing failed, so the leader keeps its job.
    tokio::time::sleep(ELECTION_MIN_TIMEOUT * 4).await;
    let term2 = cluster.check_terms();
    assert_eq!(term1, term2, "term changed with no failures");

    cluster.check_one_leader().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reelection_after_leader_disconnect() {
    let cluster = Cluster::new(3);

    let leader1 = cluster.check_one_leader().await;
    let (term1, _) = cluster.node(leader1).get_state();

    // The remaining two elect a new leader in a newer term.
    cluster.disconnect(leader1);
    let leader2 = cluster.check_one_leader().await;
    assert_ne!(leader1, leader2);
    let (term2, _) = cluster.node(leader2).get_state();
    assert!(term2 > term1);

    // The old leader comes back and steps down instead of disturbing the new one.
    cluster.connect(leader1);
    let leader3 = cluster.check_one_leader().await;

    // No quorum, no leader.
    cluster.disconnect(leader3);
    cluster.disconnect((leader3 + 1) % 3);
    tokio::time::sleep(ELECTION_MIN_TIMEOUT * 4).await;
    cluster.check_no_leader();

    // Quorum is back.
    cluster.connect((leader3 + 1) % 3);
    cluster.check_one_leader().await;

    cluster.connect(leader3);
    cluster.check_one_leader().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn no_leader_without_majority() {
    let cluster = Cluster::new(4);

    let leader = cluster.check_one_leader().await;
    let other = (leader + 1) % 4;

    // Two of four can't make a majority of three.
    cluster.disconnect(leader);
    cluster.disconnect(other);
    tokio::time::sleep(ELECTION_MIN_TIMEOUT * 4).await;
    cluster.check_no_leader();

    cluster.connect(other);
    let new_leader = cluster.check_one_leader().await;
    assert_ne!(leader, new_leader);
}

#[tokio::test(flavor = "multi_thread")]
async fn many_elections() {
    let cluster = Cluster::new(7);
    cluster.check_one_leader().await;

    for _ in 0..5 {
        // Knock out three random members. The other four still make a majority.
        let out: Vec<usize> = {
            let mut members: Vec<usize> = (0..7).collect();
            members.shuffle(&mut rand::thread_rng());
            members.truncate(3);
            members
        };
        for i in out.iter() {
            cluster.disconnect(*i);
        }

        cluster.check_one_leader().await;

        for i in out.iter() {
            cluster.connect(*i);
        }
    }

    cluster.check_one_leader().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn event_listener_sees_leadership() {
    let cluster = Cluster::new(3);

    let leader = cluster.check_one_leader().await;
    let mut listener = cluster.node(leader).event_listener();
    let snapshot = listener.current();
    assert_eq!(Role::Leader, snapshot.role);
    assert_eq!(Some(cluster.node(leader).id()), snapshot.leader);

    // Once cut off, it hears of a newer term when reconnected and steps down.
    cluster.disconnect(leader);
    let new_leader = cluster.check_one_leader().await;
    cluster.connect(leader);

    let stepped_down = tokio::time::timeout(
        Duration::from_secs(5),
        listener.wait_for(|state| state.role == Role::Follower),
    )
    .await
    .expect("old leader never stepped down")
    .expect("old leader was killed");
    assert!(stepped_down.term > snapshot.term);

    let follower = (0..3).find(|i| *i != leader && *i != new_leader).unwrap();
    let (_, is_leader) = cluster.node(follower).get_state();
    assert!(!is_leader);
}

#[tokio::test(flavor = "multi_thread")]
async fn killed_leader_gives_up_leadership() {
    let cluster = Cluster::new(3);

    let leader = cluster.check_one_leader().await;
    let node = cluster.node(leader).clone();
    assert!(node.get_state().1);

    node.kill();
    let (term, is_leader) = node.get_state();
    assert!(!is_leader, "killed replica still leads term {}", term);
}

use bytes::Bytes;
use raft_core::{ApplyMsg, InMemoryStorage, LocalNetwork, RaftNode, RaftNodeConfig, RaftOptions, ReplicaId};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

const NUM_MEMBERS: usize = 3;

/// Runs a 3 member cluster over an in-process network, replicates a few commands, then fails
/// the leader and replicates a few more through its successor.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();
    let network = LocalNetwork::new(logger.new(slog::o!("Task" => "Network")));
    let members: Vec<ReplicaId> = (0..NUM_MEMBERS).map(ReplicaId::new).collect();

    let mut nodes = Vec::with_capacity(NUM_MEMBERS);
    for my_replica_id in members.iter().copied() {
        let (apply_tx, apply_rx) = mpsc::channel(64);
        let node = raft_core::create_raft_node(RaftNodeConfig {
            my_replica_id,
            cluster_members: members.clone(),
            storage: Arc::new(InMemoryStorage::new()),
            transport: Arc::new(network.transport_for(my_replica_id)),
            apply_channel: apply_tx,
            info_logger: logger.clone(),
            options: RaftOptions::default(),
        })?;
        network.register(my_replica_id, node.rpc_handler());
        tokio::spawn(print_applied(logger.clone(), my_replica_id, apply_rx));
        nodes.push(node);
    }

    let leader = wait_for_leader(&nodes).await;
    replicate(&logger, &leader, &["set x 1", "set y 2", "del x"]).await?;

    slog::info!(logger, "Disconnecting leader {:?}", leader.id());
    network.disconnect(leader.id());
    let remaining: Vec<RaftNode> = nodes.iter().filter(|n| n.id() != leader.id()).cloned().collect();
    let new_leader = wait_for_leader(&remaining).await;
    replicate(&logger, &new_leader, &["set z 3"]).await?;

    network.connect(leader.id());
    tokio::time::sleep(Duration::from_secs(1)).await;

    for node in nodes.iter() {
        let (term, is_leader) = node.get_state();
        slog::info!(logger, "{:?}: term={} leader={}", node.id(), term, is_leader);
        node.kill();
    }

    Ok(())
}

async fn wait_for_leader(nodes: &[RaftNode]) -> RaftNode {
    loop {
        if let Some(leader) = nodes.iter().find(|n| n.get_state().1) {
            return leader.clone();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn replicate(logger: &slog::Logger, leader: &RaftNode, commands: &[&'static str]) -> Result<(), Box<dyn Error>> {
    for command in commands {
        let entry_id = leader.start(Bytes::from_static(command.as_bytes())).await?;
        slog::info!(logger, "Started {:?} at {:?}", command, entry_id);
    }
    // Give it a moment to commit.
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(())
}

async fn print_applied(logger: slog::Logger, replica_id: ReplicaId, mut apply_rx: mpsc::Receiver<ApplyMsg>) {
    while let Some(msg) = apply_rx.recv().await {
        slog::info!(
            logger,
            "{:?} applied index={} term={} command={:?}",
            replica_id,
            msg.index,
            msg.term,
            msg.command
        );
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

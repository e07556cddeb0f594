use crate::actor::{ActorClient, ReplicaActor};
use crate::api::options::RaftOptionsValidated;
use crate::api::{ApplyMsg, RaftNode, RaftOptions};
use crate::replica;
use crate::replica::{ApplyPipeline, ClusterTracker, DecodeError, InvalidCluster, ReplicaId, StableStorage};
use crate::transport::{PeerTransport, RpcHandler};
use std::convert::TryFrom;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct RaftNodeConfig {
    pub my_replica_id: ReplicaId,
    // Every member must be configured with the same list.
    pub cluster_members: Vec<ReplicaId>,
    pub storage: Arc<dyn StableStorage>,
    pub transport: Arc<dyn PeerTransport>,
    pub apply_channel: mpsc::Sender<ApplyMsg>,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftNodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Invalid cluster config: {0}")]
    InvalidCluster(String),
    // We will need to relax this later when adding membership changes.
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
    #[error("Failed to load persisted state")]
    StorageLoad(#[source] io::Error),
    #[error("Persisted state is corrupt")]
    CorruptState(#[source] DecodeError),
}

/// Make a raft node. It restores whatever `storage` holds, starts as a follower, and starts
/// talking to its peers right away. Must be called from within a tokio runtime.
pub fn create_raft_node(config: RaftNodeConfig) -> Result<RaftNode, RaftNodeCreationError> {
    let root_logger = config
        .info_logger
        .new(slog::o!("ReplicaId" => format!("{:?}", config.my_replica_id)));

    let options = RaftOptionsValidated::try_from(config.options)
        .map_err(|e| RaftNodeCreationError::IllegalOptions(e.to_string()))?;

    let cluster_tracker = ClusterTracker::create_valid_cluster(config.my_replica_id, config.cluster_members)
        .map_err(|e| match e {
            InvalidCluster::MeNotInCluster(_) => RaftNodeCreationError::MeNotInCluster,
            other => RaftNodeCreationError::InvalidCluster(other.to_string()),
        })?;

    let (actor_client, actor_queue_rx) = ActorClient::new(options.actor_queue_size);

    let (replica, commit_stream, node_state_listener) = replica::create_replica(
        root_logger.clone(),
        cluster_tracker,
        config.storage,
        config.transport,
        actor_client.weak(),
        replica::ReplicaOptions {
            leader_heartbeat_duration: options.leader_heartbeat_duration,
            election_timeout_range: options.election_timeout_range(),
            rpc_timeout: options.rpc_timeout,
            max_entries_per_append: options.max_entries_per_append,
        },
    )
    .map_err(|e| match e {
        replica::ReplicaCreationError::StorageLoad(ioe) | replica::ReplicaCreationError::LogInitialization(ioe) => {
            RaftNodeCreationError::StorageLoad(ioe)
        }
        replica::ReplicaCreationError::CorruptState(de) => RaftNodeCreationError::CorruptState(de),
    })?;

    let kill_switch = CancellationToken::new();

    let replica_actor = ReplicaActor::new(
        root_logger.new(slog::o!("Task" => "EventLoop")),
        actor_queue_rx,
        replica,
        kill_switch.clone(),
    );
    tokio::spawn(replica_actor.run_event_loop());

    let apply_pipeline = ApplyPipeline::new(
        root_logger.new(slog::o!("Task" => "ApplyPipeline")),
        commit_stream,
        config.apply_channel,
        kill_switch.clone(),
    );
    tokio::spawn(apply_pipeline.run());

    let rpc_handler = RpcHandler::new(root_logger.new(slog::o!("Task" => "RpcHandler")), actor_client.weak());

    slog::info!(root_logger, "Created raft node.");

    Ok(RaftNode {
        my_replica_id: config.my_replica_id,
        actor_client,
        node_state_listener,
        rpc_handler,
        kill_switch,
    })
}

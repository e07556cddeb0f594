use crate::actor::WeakActorClient;
use crate::commitlog::{InMemoryLog, Log};
use crate::replica::election::{ElectionConfig, ElectionState, NodeStateListener};
use crate::replica::local_state::LocalState;
use crate::replica::peers::ClusterTracker;
use crate::replica::persistence::{DecodeError, PersistentStateStore, RestoreError, StableStorage};
use crate::replica::replica::{Replica, ReplicaConfig};
use crate::replica::write_ahead_log::{self, CommitStream, WriteAheadLog, WriteAheadLogEntry};
use crate::transport::PeerTransport;
use std::io;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ReplicaOptions {
    pub leader_heartbeat_duration: Duration,
    pub election_timeout_range: RangeInclusive<Duration>,
    pub rpc_timeout: Duration,
    pub max_entries_per_append: usize,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReplicaCreationError {
    #[error("failed to load persisted state")]
    StorageLoad(#[source] io::Error),
    #[error("persisted state is corrupt")]
    CorruptState(#[source] DecodeError),
    #[error("failed to rebuild log from persisted state")]
    LogInitialization(#[source] io::Error),
}

impl From<RestoreError> for ReplicaCreationError {
    fn from(e: RestoreError) -> Self {
        match e {
            RestoreError::Load(ioe) => ReplicaCreationError::StorageLoad(ioe),
            RestoreError::Corrupt(de) => ReplicaCreationError::CorruptState(de),
        }
    }
}

/// Builds a replica from whatever `storage` holds. A replica with nothing persisted starts at
/// term 0 with an empty log. Either way it starts out as a follower.
pub(crate) fn create_replica(
    logger: slog::Logger,
    cluster_tracker: ClusterTracker,
    storage: Arc<dyn StableStorage>,
    transport: Arc<dyn PeerTransport>,
    actor_client: WeakActorClient,
    options: ReplicaOptions,
) -> Result<
    (
        Replica<InMemoryLog<WriteAheadLogEntry>>,
        CommitStream,
        NodeStateListener,
    ),
    ReplicaCreationError,
> {
    let persistent_state = PersistentStateStore::new(logger.clone(), storage);
    let restored = persistent_state.restore()?;

    let my_replica_id = cluster_tracker.my_replica_id();
    let local_state = LocalState::restored(my_replica_id, restored.current_term, restored.voted_for);

    let mut commit_log = InMemoryLog::create().map_err(ReplicaCreationError::LogInitialization)?;
    for entry in restored.entries {
        commit_log
            .append(entry)
            .map_err(ReplicaCreationError::LogInitialization)?;
    }

    let (commit_stream_publisher, commit_stream) = write_ahead_log::commit_stream();
    let write_ahead_log = WriteAheadLog::new(logger.clone(), commit_log, commit_stream_publisher)
        .map_err(ReplicaCreationError::LogInitialization)?;

    let (election_state, node_state_listener) = ElectionState::new_follower(
        ElectionConfig {
            my_replica_id,
            leader_heartbeat_duration: options.leader_heartbeat_duration,
            election_timeout_range: options.election_timeout_range,
        },
        actor_client.clone(),
        restored.current_term,
    );

    let replica = Replica::new(ReplicaConfig {
        logger,
        cluster_tracker,
        local_state,
        election_state,
        write_ahead_log,
        persistent_state,
        transport,
        actor_client,
        rpc_timeout: options.rpc_timeout,
        max_entries_per_append: options.max_entries_per_append,
        // A candidate keeps asking unreachable peers, at heartbeat pace.
        request_vote_retry_delay: options.leader_heartbeat_duration,
    });

    Ok((replica, commit_stream, node_state_listener))
}

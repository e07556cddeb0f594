use crate::actor::ActorClient;
use crate::api::{EntryId, EventListener};
use crate::replica;
use crate::replica::{NodeStateListener, ReplicaId};
use crate::transport::RpcHandler;
use bytes::Bytes;
use std::io;
use tokio_util::sync::CancellationToken;

/// RaftNode is the application's handle to one raft replica. Dropping every clone of it stops
/// the replica, same as `kill()`.
#[derive(Clone)]
pub struct RaftNode {
    pub(super) my_replica_id: ReplicaId,
    pub(super) actor_client: ActorClient,
    pub(super) node_state_listener: NodeStateListener,
    pub(super) rpc_handler: RpcHandler,
    pub(super) kill_switch: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("I'm not leader")]
    NotLeader {
        current_term: u64,
        leader_hint: Option<ReplicaId>,
    },

    #[error("Replica has been killed")]
    Killed,

    // The replica halts itself after this.
    #[error("Failed to persist log")]
    LocalIoError(#[source] io::Error),
}

impl RaftNode {
    pub fn id(&self) -> ReplicaId {
        self.my_replica_id
    }

    /// Propose `command` for the log. On the leader, the entry is appended and persisted before
    /// this returns, and will show up on the apply channel if it's ever committed. There's no
    /// guarantee it will be: leadership can be lost before it replicates.
    pub async fn start(&self, command: Bytes) -> Result<EntryId, StartError> {
        if self.kill_switch.is_cancelled() {
            return Err(StartError::Killed);
        }

        self.actor_client
            .start(replica::StartInput { command })
            .await
            .map(|output| EntryId {
                index: output.index.as_u64(),
                term: output.term.as_u64(),
            })
            .map_err(|e| match e {
                replica::StartError::NotLeader {
                    current_term,
                    leader_hint,
                } => StartError::NotLeader {
                    current_term: current_term.as_u64(),
                    leader_hint,
                },
                replica::StartError::LocalIoError(ioe) => StartError::LocalIoError(ioe),
                replica::StartError::ActorExited => StartError::Killed,
            })
    }

    /// Current term, and whether this replica believes it's the leader. Never blocks. A killed
    /// replica is never leader.
    pub fn get_state(&self) -> (u64, bool) {
        let snapshot = self.node_state_listener.current();
        (snapshot.term, snapshot.is_leader() && !self.kill_switch.is_cancelled())
    }

    /// Stop the replica. Its event loop, timers and apply pipeline exit, and its RPC handler
    /// reports it as killed from then on. Safe to call more than once.
    pub fn kill(&self) {
        self.kill_switch.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.kill_switch.is_cancelled()
    }

    pub fn event_listener(&self) -> EventListener {
        EventListener::new(self.node_state_listener.clone())
    }

    /// Requests arriving for this replica must be handed to this. Register it with the transport.
    pub fn rpc_handler(&self) -> RpcHandler {
        self.rpc_handler.clone()
    }
}

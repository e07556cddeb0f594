use crate::replica::ReplicaId;
use crate::transport::{
    AppendEntriesReply, AppendEntriesRequest, PeerTransport, RequestVoteReply, RequestVoteRequest, RpcHandler,
    RpcHandlerError, TransportError,
};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Duration;

/// LocalNetwork connects replicas living in the same process. Tests use it to partition,
/// crash and restart replicas, and to make the network lossy.
///
/// A replica receives requests only while it is registered and connected. A request between two
/// replicas is delivered only if both ends are connected, both when it's sent and when the reply
/// comes back.
#[derive(Clone)]
pub struct LocalNetwork {
    logger: slog::Logger,
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<ReplicaId, RpcHandler>,
    connected: HashSet<ReplicaId>,
    unreliable: bool,
    rpc_count: u64,
}

// When unreliable, each of request and reply is dropped with this probability.
const UNRELIABLE_DROP_PROBABILITY: f64 = 0.1;
const UNRELIABLE_MAX_DELAY: Duration = Duration::from_millis(27);
// How long an unreachable peer takes to "not answer".
const UNREACHABLE_MAX_DELAY: Duration = Duration::from_millis(10);

impl LocalNetwork {
    pub fn new(logger: slog::Logger) -> Self {
        LocalNetwork {
            logger,
            state: Arc::new(Mutex::new(NetworkState::default())),
        }
    }

    /// Register (or replace, after a restart) the handler for `replica_id`, and connect it.
    pub fn register(&self, replica_id: ReplicaId, handler: RpcHandler) {
        let mut state = self.lock();
        state.handlers.insert(replica_id, handler);
        state.connected.insert(replica_id);
    }

    pub fn connect(&self, replica_id: ReplicaId) {
        slog::info!(self.logger, "Connecting {:?}", replica_id);
        self.lock().connected.insert(replica_id);
    }

    pub fn disconnect(&self, replica_id: ReplicaId) {
        slog::info!(self.logger, "Disconnecting {:?}", replica_id);
        self.lock().connected.remove(&replica_id);
    }

    pub fn is_connected(&self, replica_id: ReplicaId) -> bool {
        self.lock().connected.contains(&replica_id)
    }

    pub fn set_unreliable(&self, unreliable: bool) {
        self.lock().unreliable = unreliable;
    }

    /// Number of requests sent over the network so far, delivered or not.
    pub fn rpc_count(&self) -> u64 {
        self.lock().rpc_count
    }

    /// The transport `replica_id` uses to reach its peers.
    pub fn transport_for(&self, replica_id: ReplicaId) -> LocalTransport {
        LocalTransport {
            from: replica_id,
            network: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().expect("LocalNetwork mutex poisoned")
    }

    /// Decide the fate of a request before it's sent.
    fn route(&self, from: ReplicaId, to: ReplicaId) -> Route {
        let mut state = self.lock();
        state.rpc_count += 1;

        let handler = match state.handlers.get(&to) {
            Some(handler) if state.connected.contains(&from) && state.connected.contains(&to) => handler.clone(),
            _ => return Route::Unreachable(random_delay(UNREACHABLE_MAX_DELAY)),
        };

        if state.unreliable {
            let mut rng = rand::thread_rng();
            let delay = rng.gen_range(Duration::ZERO..=UNRELIABLE_MAX_DELAY);
            if rng.gen_bool(UNRELIABLE_DROP_PROBABILITY) {
                return Route::DropRequest(delay);
            }
            let drop_reply = rng.gen_bool(UNRELIABLE_DROP_PROBABILITY);
            Route::Deliver {
                handler,
                delay,
                drop_reply,
            }
        } else {
            Route::Deliver {
                handler,
                delay: Duration::ZERO,
                drop_reply: false,
            }
        }
    }

    fn both_connected(&self, from: ReplicaId, to: ReplicaId) -> bool {
        let state = self.lock();
        state.connected.contains(&from) && state.connected.contains(&to)
    }
}

enum Route {
    Deliver {
        handler: RpcHandler,
        delay: Duration,
        drop_reply: bool,
    },
    DropRequest(Duration),
    Unreachable(Duration),
}

fn random_delay(max: Duration) -> Duration {
    rand::thread_rng().gen_range(Duration::ZERO..=max)
}

/// One replica's view of a `LocalNetwork`.
#[derive(Clone)]
pub struct LocalTransport {
    from: ReplicaId,
    network: LocalNetwork,
}

impl LocalTransport {
    async fn call<R, F, Fut>(&self, to: ReplicaId, send: F) -> Result<R, TransportError>
    where
        F: FnOnce(RpcHandler) -> Fut + Send,
        Fut: Future<Output = Result<R, RpcHandlerError>> + Send,
        R: Send,
    {
        let (handler, delay, drop_reply) = match self.network.route(self.from, to) {
            Route::Deliver {
                handler,
                delay,
                drop_reply,
            } => (handler, delay, drop_reply),
            Route::DropRequest(delay) => {
                tokio::time::sleep(delay).await;
                return Err(TransportError::Dropped);
            }
            Route::Unreachable(delay) => {
                tokio::time::sleep(delay).await;
                return Err(TransportError::Unreachable(to));
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = send(handler).await?;

        // The handler ran, but its reply can still be lost on the way back.
        if drop_reply || !self.network.both_connected(self.from, to) {
            return Err(TransportError::Dropped);
        }

        Ok(reply)
    }
}

#[async_trait::async_trait]
impl PeerTransport for LocalTransport {
    async fn request_vote(
        &self,
        to: ReplicaId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteReply, TransportError> {
        self.call(to, |handler| async move { handler.request_vote(request).await })
            .await
    }

    async fn append_entries(
        &self,
        to: ReplicaId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError> {
        self.call(to, |handler| async move { handler.append_entries(request).await })
            .await
    }
}

use crate::replica::ReplicaId;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// What the local replica believes about itself and the cluster at one point in time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeStateSnapshot {
    pub term: u64,
    pub role: Role,
    /// The replica we believe is leader for `term`, if any. Ourselves when `role` is `Leader`.
    pub leader: Option<ReplicaId>,
}

impl NodeStateSnapshot {
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

pub(super) fn new(initial_state: NodeStateSnapshot) -> (NodeStateNotifier, NodeStateListener) {
    let (snd, rcv) = watch::channel(initial_state);

    (NodeStateNotifier { snd }, NodeStateListener { rcv })
}

pub(super) struct NodeStateNotifier {
    snd: watch::Sender<NodeStateSnapshot>,
}

impl NodeStateNotifier {
    pub(super) fn notify_new_state(&self, new_state: NodeStateSnapshot) {
        // Nobody listening is fine.
        let _ = self.snd.send(new_state);
    }
}

/// Doesn't queue intermediate states. If several transitions happen between two calls to
/// `next()`, only the latest is observed.
#[derive(Clone)]
pub(crate) struct NodeStateListener {
    rcv: watch::Receiver<NodeStateSnapshot>,
}

impl NodeStateListener {
    /// None once the replica has exited.
    pub(crate) async fn next(&mut self) -> Option<NodeStateSnapshot> {
        match self.rcv.changed().await {
            Ok(_) => Some(self.rcv.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    pub(crate) fn current(&self) -> NodeStateSnapshot {
        self.rcv.borrow().clone()
    }
}

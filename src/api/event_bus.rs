use crate::replica::{NodeStateListener, NodeStateSnapshot};

/// Observes role and term changes of the local replica.
///
/// Consuming this is subtle. It doesn't queue intermediate events: if several transitions happen
/// between two calls to `next_event()`, only the most recent one is returned.
#[derive(Clone)]
pub struct EventListener {
    node_state_listener: NodeStateListener,
}

impl EventListener {
    pub(crate) fn new(node_state_listener: NodeStateListener) -> Self {
        EventListener { node_state_listener }
    }

    /// `next_event()` returns the next state this local raft replica transitions to. None once
    /// the replica has been killed.
    pub async fn next_event(&mut self) -> Option<NodeStateSnapshot> {
        self.node_state_listener.next().await
    }

    pub fn current(&self) -> NodeStateSnapshot {
        self.node_state_listener.current()
    }

    /// Wait until this replica believes `predicate` holds. None if the replica was killed first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<NodeStateSnapshot>
    where
        F: FnMut(&NodeStateSnapshot) -> bool,
    {
        let current = self.current();
        if predicate(&current) {
            return Some(current);
        }

        loop {
            let next = self.next_event().await?;
            if predicate(&next) {
                return Some(next);
            }
        }
    }
}

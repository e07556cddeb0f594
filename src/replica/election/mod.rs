mod election_state;
mod leader_state;
mod state_change_listener;
mod timers;

pub(crate) use election_state::CurrentLeader;
pub(crate) use election_state::ElectionConfig;
pub(crate) use election_state::ElectionState;
pub(crate) use leader_state::LeaderStateTracker;
pub(crate) use leader_state::PeerState;
pub(crate) use leader_state::PeerStateUpdate;
pub(crate) use state_change_listener::NodeStateListener;
pub use state_change_listener::NodeStateSnapshot;
pub use state_change_listener::Role;

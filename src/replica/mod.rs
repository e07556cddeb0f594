mod apply_pipeline;
mod election;
mod local_state;
mod peers;
mod persistence;
mod replica;
mod replica_api;
mod replica_wiring;
mod write_ahead_log;

pub use election::NodeStateSnapshot;
pub use election::Role;
pub use peers::ReplicaId;
pub use persistence::DecodeError;
pub use persistence::FileStorage;
pub use persistence::InMemoryStorage;
pub use persistence::StableStorage;

pub(crate) use apply_pipeline::ApplyPipeline;
pub(crate) use election::NodeStateListener;
pub(crate) use local_state::Term;
pub(crate) use peers::ClusterTracker;
pub(crate) use peers::InvalidCluster;
pub(crate) use replica::Replica;
pub(crate) use replica_api::*;
pub(crate) use replica_wiring::create_replica;
pub(crate) use replica_wiring::ReplicaCreationError;
pub(crate) use replica_wiring::ReplicaOptions;
pub(crate) use write_ahead_log::WriteAheadLogEntry;

//! This mod is meant to hold most of the code for the library's client-facing API.
mod apply_msg;
mod event_bus;
mod node;
mod options;
mod wiring;

pub use apply_msg::ApplyMsg;
pub use apply_msg::EntryId;
pub use event_bus::EventListener;
pub use node::RaftNode;
pub use node::StartError;
pub use options::RaftOptions;
pub use wiring::create_raft_node;
pub use wiring::RaftNodeConfig;
pub use wiring::RaftNodeCreationError;

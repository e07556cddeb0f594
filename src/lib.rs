mod actor;
mod api;
mod commitlog;
mod replica;
mod transport;

pub use api::create_raft_node;
pub use api::ApplyMsg;
pub use api::EntryId;
pub use api::EventListener;
pub use api::RaftNode;
pub use api::RaftNodeConfig;
pub use api::RaftNodeCreationError;
pub use api::RaftOptions;
pub use api::StartError;
pub use replica::DecodeError;
pub use replica::FileStorage;
pub use replica::InMemoryStorage;
pub use replica::NodeStateSnapshot;
pub use replica::ReplicaId;
pub use replica::Role;
pub use replica::StableStorage;
pub use transport::AppendEntriesReply;
pub use transport::AppendEntriesRequest;
pub use transport::LocalNetwork;
pub use transport::LocalTransport;
pub use transport::LogEntry;
pub use transport::PeerTransport;
pub use transport::RequestVoteReply;
pub use transport::RequestVoteRequest;
pub use transport::RpcHandler;
pub use transport::RpcHandlerError;
pub use transport::TransportError;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.

//! How replicas talk to each other. The replica only knows the `PeerTransport` trait and the
//! message structs. Delivering them is someone else's job.
mod local_network;
mod messages;
mod peer_transport;
mod rpc_handler;

pub use local_network::LocalNetwork;
pub use local_network::LocalTransport;
pub use messages::AppendEntriesReply;
pub use messages::AppendEntriesRequest;
pub use messages::LogEntry;
pub use messages::RequestVoteReply;
pub use messages::RequestVoteRequest;
pub use peer_transport::PeerTransport;
pub use peer_transport::TransportError;
pub use rpc_handler::RpcHandler;
pub use rpc_handler::RpcHandlerError;

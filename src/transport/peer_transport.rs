use crate::replica::ReplicaId;
use crate::transport::{
    AppendEntriesReply, AppendEntriesRequest, RequestVoteReply, RequestVoteRequest, RpcHandlerError,
};

/// PeerTransport delivers a request to a peer's `RpcHandler` and brings back its reply. It may
/// lose or delay messages, but must not corrupt them. The replica bounds every call with its
/// own timeout.
#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn request_vote(
        &self,
        to: ReplicaId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteReply, TransportError>;

    async fn append_entries(
        &self,
        to: ReplicaId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError>;
}

/// Any error means the message (or its reply) was lost. The replica retries later.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0:?} is unreachable")]
    Unreachable(ReplicaId),
    #[error("message dropped")]
    Dropped,
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("remote replica has been killed")]
    ServerKilled,
    #[error("remote replica failed to handle request: {0}")]
    ServerFault(String),
}

impl From<RpcHandlerError> for TransportError {
    fn from(e: RpcHandlerError) -> Self {
        match e {
            RpcHandlerError::ServerKilled => TransportError::ServerKilled,
            other => TransportError::ServerFault(other.to_string()),
        }
    }
}

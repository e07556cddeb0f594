use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, RequestVoteError, RequestVoteInput, RequestVoteOutput,
    Term, WriteAheadLogEntry,
};
use crate::transport::{AppendEntriesReply, AppendEntriesRequest, RequestVoteReply, RequestVoteRequest};

/// RpcHandler is the server side of a replica. A transport hands it requests that arrived for
/// this replica. Cheap to clone, and doesn't keep a killed replica alive.
#[derive(Clone)]
pub struct RpcHandler {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcHandlerError {
    #[error("replica has been killed")]
    ServerKilled,
    #[error("invalid request: {0}")]
    InvalidArgument(&'static str),
    #[error("replica failed to handle request: {0}")]
    ServerFault(String),
}

impl RpcHandler {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RpcHandler { logger, local_replica }
    }

    pub async fn request_vote(&self, rpc_request: RequestVoteRequest) -> Result<RequestVoteReply, RpcHandlerError> {
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let app_input = Self::convert_request_vote_input(rpc_request)?;
        let app_result = self.local_replica.request_vote(app_input).await;
        let rpc_reply = Self::convert_request_vote_result(app_result);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_reply);

        rpc_reply
    }

    fn convert_request_vote_input(rpc_request: RequestVoteRequest) -> Result<RequestVoteInput, RpcHandlerError> {
        let candidate_last_log_entry =
            Self::convert_log_entry_metadata(rpc_request.last_log_term, rpc_request.last_log_index)?;

        Ok(RequestVoteInput {
            candidate_term: Term::new(rpc_request.term),
            candidate_id: rpc_request.candidate_id,
            candidate_last_log_entry,
        })
    }

    fn convert_request_vote_result(
        app_result: Result<RequestVoteOutput, RequestVoteError>,
    ) -> Result<RequestVoteReply, RpcHandlerError> {
        match app_result {
            Ok(ok) => Ok(RequestVoteReply {
                term: ok.current_term.as_u64(),
                vote_granted: ok.vote_granted,
            }),
            Err(RequestVoteError::RequestTermOutOfDate(term_info)) => Ok(RequestVoteReply {
                term: term_info.current_term.as_u64(),
                vote_granted: false,
            }),
            Err(RequestVoteError::CandidateNotInCluster) => {
                Err(RpcHandlerError::InvalidArgument("Candidate is not in the cluster"))
            }
            Err(RequestVoteError::ServerIoError(e)) => Err(RpcHandlerError::ServerFault(format!(
                "Failed to persist vote: {}",
                e
            ))),
            Err(RequestVoteError::ActorExited) => Err(RpcHandlerError::ServerKilled),
        }
    }

    pub async fn append_entries(
        &self,
        rpc_request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, RpcHandlerError> {
        slog::debug!(
            self.logger,
            "ServerWire - AppendEntries(Term={}, Leader={:?}, Prev=({}, {}), Entries={}, Commit={})",
            rpc_request.term,
            rpc_request.leader_id,
            rpc_request.prev_log_term,
            rpc_request.prev_log_index,
            rpc_request.entries.len(),
            rpc_request.leader_commit,
        );
        let app_input = Self::convert_append_entries_input(rpc_request)?;
        let app_result = self.local_replica.append_entries(app_input).await;
        let rpc_reply = Self::convert_append_entries_result(app_result);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_reply);

        rpc_reply
    }

    fn convert_append_entries_input(rpc_request: AppendEntriesRequest) -> Result<AppendEntriesInput, RpcHandlerError> {
        let leader_previous_log_entry =
            Self::convert_log_entry_metadata(rpc_request.prev_log_term, rpc_request.prev_log_index)?;

        let leader_commit_index = Index::from_u64_or_none(rpc_request.leader_commit);

        let mut new_entries = Vec::with_capacity(rpc_request.entries.len());
        for entry in rpc_request.entries {
            if entry.term == 0 {
                return Err(RpcHandlerError::InvalidArgument("Log entry with term 0"));
            }
            new_entries.push(WriteAheadLogEntry {
                term: Term::new(entry.term),
                data: entry.command,
            })
        }

        Ok(AppendEntriesInput {
            leader_term: Term::new(rpc_request.term),
            leader_id: rpc_request.leader_id,
            leader_previous_log_entry,
            leader_commit_index,
            new_entries,
        })
    }

    fn convert_log_entry_metadata(
        log_entry_term: u64,
        log_entry_index: u64,
    ) -> Result<Option<(Term, Index)>, RpcHandlerError> {
        match (log_entry_term, log_entry_index) {
            (0, 0) => Ok(None),
            (0, _) => Err(RpcHandlerError::InvalidArgument("Log entry term 0 and index non-0")),
            (_, 0) => Err(RpcHandlerError::InvalidArgument("Log entry index 0 and term non-0")),
            (term, index) => Ok(Some((Term::new(term), Index::new(index)))),
        }
    }

    fn convert_append_entries_result(
        app_result: Result<AppendEntriesOutput, AppendEntriesError>,
    ) -> Result<AppendEntriesReply, RpcHandlerError> {
        match app_result {
            Ok(ok) => Ok(AppendEntriesReply {
                term: ok.current_term.as_u64(),
                success: true,
                conflict_index: 0,
                conflict_term: 0,
            }),
            Err(AppendEntriesError::ClientTermOutOfDate(term_info)) => Ok(AppendEntriesReply {
                term: term_info.current_term.as_u64(),
                success: false,
                conflict_index: 0,
                conflict_term: 0,
            }),
            Err(AppendEntriesError::ServerMissingPreviousLogEntry(hint)) => Ok(AppendEntriesReply {
                term: hint.current_term.as_u64(),
                success: false,
                conflict_index: hint.conflict_index.as_u64(),
                conflict_term: hint.conflict_term.map_or(0, |term| term.as_u64()),
            }),
            Err(AppendEntriesError::ClientNotInCluster) => {
                Err(RpcHandlerError::InvalidArgument("Leader is not in the cluster"))
            }
            Err(AppendEntriesError::ServerIoError(e)) => {
                Err(RpcHandlerError::ServerFault(format!("Local IO failure: {}", e)))
            }
            Err(AppendEntriesError::ActorExited) => Err(RpcHandlerError::ServerKilled),
        }
    }
}

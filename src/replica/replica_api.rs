use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use crate::replica::WriteAheadLogEntry;
use bytes::Bytes;
use std::io;

/// A command the application wants replicated. Opaque to raft.
#[derive(Debug)]
pub(crate) struct StartInput {
    pub(crate) command: Bytes,
}

#[derive(Debug)]
pub(crate) struct StartOutput {
    pub(crate) term: Term,
    pub(crate) index: Index,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum StartError {
    #[error("I'm not leader")]
    NotLeader {
        current_term: Term,
        leader_hint: Option<ReplicaId>,
    },

    #[error("Failed to persist log")]
    LocalIoError(#[source] io::Error),

    #[error("Replica has been killed")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct RequestVoteInput {
    pub(crate) candidate_term: Term,
    pub(crate) candidate_id: ReplicaId,
    pub(crate) candidate_last_log_entry: Option<(Term, Index)>,
}

#[derive(Debug)]
pub(crate) struct RequestVoteOutput {
    // Our term after handling the request.
    pub(crate) current_term: Term,
    pub(crate) vote_granted: bool,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum RequestVoteError {
    #[error("Candidate is not in the cluster")]
    CandidateNotInCluster,
    #[error("Candidate's term is out of date")]
    RequestTermOutOfDate(TermOutOfDateInfo),
    #[error("Failed to persist term or vote")]
    ServerIoError(#[source] io::Error),
    #[error("Replica has been killed")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesInput {
    pub(crate) leader_term: Term,
    pub(crate) leader_id: ReplicaId,
    // "Previous log entry" is the log entry immediately preceding the new ones in AppendEntriesInput.
    pub(crate) leader_previous_log_entry: Option<(Term, Index)>,
    pub(crate) leader_commit_index: Option<Index>,
    pub(crate) new_entries: Vec<WriteAheadLogEntry>,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesOutput {
    pub(crate) current_term: Term,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum AppendEntriesError {
    #[error("Leader is not in the cluster")]
    ClientNotInCluster,
    #[error("Leader's term is out of date")]
    ClientTermOutOfDate(TermOutOfDateInfo),
    #[error("Log doesn't contain the previous entry")]
    ServerMissingPreviousLogEntry(ConflictHint),
    #[error("Failed to read or persist log")]
    ServerIoError(#[source] io::Error),
    #[error("Replica has been killed")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct TermOutOfDateInfo {
    pub(crate) current_term: Term,
}

/// Where the follower's log stops agreeing with the leader's, so the leader can skip back a
/// whole term at a time instead of one entry per round trip.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConflictHint {
    pub(crate) current_term: Term,
    // Term of our entry at the leader's prev index. None if our log is too short to have one.
    pub(crate) conflict_term: Option<Term>,
    // First index of `conflict_term` in our log, or our next index if our log is too short.
    pub(crate) conflict_index: Index,
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) result: RequestVoteResult,
}

#[derive(Debug)]
pub(crate) enum RequestVoteResult {
    VoteGranted,
    VoteNotGranted,
    StaleTerm { new_term: Term },
    RetryableFailure,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<(), AppendEntriesReplyFromPeerError>,
}

/// What was sent in the AppendEntries request this reply belongs to.
#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) previous_log_entry_index: Option<Index>,
    pub(crate) num_log_entries: usize,
}

#[derive(Debug)]
pub(crate) enum AppendEntriesReplyFromPeerError {
    PeerMissingPreviousLogEntry { conflict_index: Option<Index> },
    RetryableFailure(String),
    StaleTerm { new_term: Term },
}

/// LeaderTimerTick contains info for a single tick of a leader's per-peer timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderTimerTick {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
}

use crate::replica::ReplicaId;
use bytes::Bytes;

// Terms and indexes are plain integers here. Index 0 and term 0 mean "nothing", e.g. a
// `prev_log_index` of 0 means the new entries start at the beginning of the log.

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: ReplicaId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: ReplicaId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub term: u64,
    pub command: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// On a log mismatch, where the leader should resume sending from. 0 if unknown.
    pub conflict_index: u64,
    /// On a log mismatch, the term of the follower's conflicting entry. 0 if its log was too short.
    pub conflict_term: u64,
}

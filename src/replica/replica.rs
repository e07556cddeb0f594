use crate::actor::WeakActorClient;
use crate::commitlog::{Index, Log};
use crate::replica::election::{CurrentLeader, ElectionState, PeerStateUpdate};
use crate::replica::local_state::{LocalState, Term};
use crate::replica::peers::{ClusterTracker, ReplicaId};
use crate::replica::persistence::PersistentStateStore;
use crate::replica::replica_api::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, AppendEntriesReplyFromPeer,
    AppendEntriesReplyFromPeerError, ConflictHint, LeaderTimerTick, RequestVoteError, RequestVoteInput,
    RequestVoteOutput, RequestVoteReplyFromPeer, RequestVoteResult, StartError, StartInput, StartOutput,
    TermOutOfDateInfo,
};
use crate::replica::write_ahead_log::{WriteAheadLog, WriteAheadLogEntry};
use crate::transport::{PeerTransport, RequestVoteRequest};
use std::sync::Arc;
use std::{cmp, io};
use tokio::time::Duration;

pub(crate) struct ReplicaConfig<L>
where
    L: Log<WriteAheadLogEntry>,
{
    pub logger: slog::Logger,
    pub cluster_tracker: ClusterTracker,
    pub local_state: LocalState,
    pub election_state: ElectionState,
    pub write_ahead_log: WriteAheadLog<L>,
    pub persistent_state: PersistentStateStore,
    pub transport: Arc<dyn PeerTransport>,
    pub actor_client: WeakActorClient,
    pub rpc_timeout: Duration,
    pub max_entries_per_append: usize,
    pub request_vote_retry_delay: Duration,
}

/// Replica is the raft algorithm. It only ever runs inside the replica actor, so every method
/// takes `&mut self` and none of them block: remote calls are spawned and their replies come back
/// as new events.
pub(crate) struct Replica<L>
where
    L: Log<WriteAheadLogEntry>,
{
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_tracker: ClusterTracker,
    local_state: LocalState,
    election_state: ElectionState,
    write_ahead_log: WriteAheadLog<L>,
    persistent_state: PersistentStateStore,
    transport: Arc<dyn PeerTransport>,
    actor_client: WeakActorClient,
    rpc_timeout: Duration,
    max_entries_per_append: usize,
    request_vote_retry_delay: Duration,
    // Set when persisting fails. A replica that can't persist can't keep its promises, so the
    // actor stops feeding it events.
    halted: bool,
}

impl<L> Replica<L>
where
    L: Log<WriteAheadLogEntry>,
{
    pub(crate) fn new(config: ReplicaConfig<L>) -> Self {
        Replica {
            logger: config.logger,
            my_replica_id: config.cluster_tracker.my_replica_id(),
            cluster_tracker: config.cluster_tracker,
            local_state: config.local_state,
            election_state: config.election_state,
            write_ahead_log: config.write_ahead_log,
            persistent_state: config.persistent_state,
            transport: config.transport,
            actor_client: config.actor_client,
            rpc_timeout: config.rpc_timeout,
            max_entries_per_append: config.max_entries_per_append,
            request_vote_retry_delay: config.request_vote_retry_delay,
            halted: false,
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted
    }

    /// Term, vote and the whole log go to stable storage together.
    fn persist(&mut self) -> Result<(), io::Error> {
        match self.persistent_state.persist(&self.local_state, &self.write_ahead_log) {
            Ok(()) => Ok(()),
            Err(e) => {
                slog::crit!(self.logger, "Failed to persist replica state. Halting. {:?}", e);
                self.halted = true;
                Err(e.into())
            }
        }
    }

    /// > If RPC request or response contains term T > currentTerm:
    /// > set currentTerm = T, convert to follower (§5.1)
    ///
    /// Returns true if our term increased.
    fn observe_term(&mut self, term: Term, leader: Option<ReplicaId>) -> bool {
        if !self.local_state.store_term_if_increased(term) {
            return false;
        }

        self.election_state.transition_to_follower(term, leader);
        slog::info!(
            self.logger,
            "Observed increased term. Election state: {:?}",
            self.election_state
        );
        true
    }

    pub(crate) fn handle_start(&mut self, input: StartInput) -> Result<StartOutput, StartError> {
        let current_term = self.local_state.current_term();
        match self.election_state.current_leader() {
            CurrentLeader::Me => { /* carry on */ }
            CurrentLeader::Other(leader_id) => {
                return Err(StartError::NotLeader {
                    current_term,
                    leader_hint: Some(leader_id),
                })
            }
            CurrentLeader::Unknown => {
                return Err(StartError::NotLeader {
                    current_term,
                    leader_hint: None,
                })
            }
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let appended_index = self
            .write_ahead_log
            .append(WriteAheadLogEntry {
                term: current_term,
                data: input.command,
            })
            .map_err(StartError::LocalIoError)?;
        self.persist().map_err(StartError::LocalIoError)?;

        // Single node clusters commit right here.
        self.try_advance_commit_index();

        // Don't wait for the next heartbeat.
        for peer_id in self.cluster_tracker.peer_ids().to_vec() {
            self.replicate_to_peer(peer_id, current_term);
        }

        Ok(StartOutput {
            term: current_term,
            index: appended_index,
        })
    }

    pub(crate) fn server_handle_request_vote(
        &mut self,
        input: RequestVoteInput,
    ) -> Result<RequestVoteOutput, RequestVoteError> {
        // Ensure candidate is known member.
        if !self.cluster_tracker.contains_member(&input.candidate_id) {
            return Err(RequestVoteError::CandidateNotInCluster);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.candidate_term < current_term {
            slog::info!(self.logger, "Not granting vote. Client term is out of date.");
            return Err(RequestVoteError::RequestTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        let mut dirty = self.observe_term(input.candidate_term, None);

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        let (current_term, opt_voted_for) = self.local_state.voted_for_current_term();
        let vote_granted = match opt_voted_for {
            Some(voted_for) if voted_for != input.candidate_id => {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                false
            }
            // Candidate retried. It passed the log check when we voted.
            Some(_) => true,
            None => {
                if self.is_candidate_log_gte_mine(input.candidate_last_log_entry) {
                    slog::info!(self.logger, "Voting for {:?}.", input.candidate_id);
                    dirty |= self
                        .local_state
                        .store_vote_for_term_if_unvoted(current_term, input.candidate_id);
                    true
                } else {
                    slog::info!(self.logger, "Not granting vote. Candidate log is out of date.");
                    false
                }
            }
        };

        // The vote (and term) must be durable before the candidate hears about it.
        if dirty {
            self.persist().map_err(RequestVoteError::ServerIoError)?;
        }

        if vote_granted {
            self.election_state.reset_timeout_if_follower();
        }

        Ok(RequestVoteOutput {
            current_term,
            vote_granted,
        })
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_entry: Option<(Term, Index)>) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        match (self.write_ahead_log.latest_entry(), candidate_last_entry) {
            (None, _) => true,
            (Some(_), None) => false,
            (
                Some((my_last_entry_term, my_last_entry_index)),
                Some((candidate_last_entry_term, candidate_last_entry_index)),
            ) => {
                if candidate_last_entry_term != my_last_entry_term {
                    return candidate_last_entry_term > my_last_entry_term;
                }

                candidate_last_entry_index >= my_last_entry_index
            }
        }
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        if let RequestVoteResult::StaleTerm { new_term } = reply.result {
            if self.observe_term(new_term, None) {
                // Halts on failure.
                let _ = self.persist();
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::info!(
                self.logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }

        match reply.result {
            RequestVoteResult::VoteGranted => {
                let num_votes_received = match self.election_state.add_vote_if_candidate(reply.peer_id) {
                    Some(v) => v,
                    None => {
                        slog::info!(
                            self.logger,
                            "Received vote for term {:?} after transitioning to a election state: {:?}",
                            reply.term,
                            self.election_state,
                        );
                        return;
                    }
                };

                slog::info!(
                    self.logger,
                    "Received {}/{} votes for term {:?}",
                    num_votes_received,
                    self.cluster_tracker.num_voting_replicas(),
                    reply.term,
                );

                if num_votes_received >= self.cluster_tracker.majority_count() {
                    self.become_leader(reply.term);
                }
            }
            RequestVoteResult::VoteNotGranted => {
                slog::info!(
                    self.logger,
                    "Vote not granted from {:?} for term {:?}",
                    reply.peer_id,
                    reply.term,
                );
            }
            RequestVoteResult::StaleTerm { new_term } => {
                slog::warn!(
                    self.logger,
                    "Peer {:?} claimed our term is stale, but its term {:?} is not newer.",
                    reply.peer_id,
                    new_term
                );
            }
            RequestVoteResult::RetryableFailure => {
                if !self.election_state.is_candidate() {
                    return;
                }
                slog::debug!(self.logger, "Retrying RequestVote to {:?}", reply.peer_id);
                tokio::task::spawn(peer_calls::request_vote(
                    self.logger.clone(),
                    self.transport.clone(),
                    reply.peer_id,
                    self.new_request_vote_request(reply.term),
                    self.rpc_timeout,
                    self.request_vote_retry_delay,
                    self.actor_client.clone(),
                    reply.term,
                ));
            }
        }
    }

    fn become_leader(&mut self, term: Term) {
        self.election_state.transition_to_leader(
            term,
            self.cluster_tracker.peer_ids(),
            self.write_ahead_log.latest_index(),
        );
        slog::info!(self.logger, "Elected leader. Election state: {:?}", self.election_state);

        // Heartbeat timers tick immediately, which announces us to peers.
        self.try_advance_commit_index();
    }

    pub(crate) fn server_handle_append_entries(
        &mut self,
        input: AppendEntriesInput,
    ) -> Result<AppendEntriesOutput, AppendEntriesError> {
        // Ensure leader is known member.
        if !self.cluster_tracker.contains_member(&input.leader_id) {
            return Err(AppendEntriesError::ClientNotInCluster);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.leader_term < current_term {
            return Err(AppendEntriesError::ClientTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        let dirty = self.observe_term(input.leader_term, Some(input.leader_id));
        if !dirty {
            match self.election_state.current_leader() {
                CurrentLeader::Me => {
                    // Two leaders in one term. Someone voted twice.
                    slog::crit!(
                        self.logger,
                        "Received AppendEntries from {:?} for term {:?}, but I'm leader of that term.",
                        input.leader_id,
                        current_term
                    );
                    self.election_state
                        .transition_to_follower(current_term, Some(input.leader_id));
                }
                // > If AppendEntries RPC received from new leader: convert to follower
                _ if self.election_state.is_candidate() => {
                    self.election_state
                        .transition_to_follower(current_term, Some(input.leader_id));
                }
                _ => self.election_state.set_leader_if_unknown(input.leader_id),
            }
        }

        self.election_state.reset_timeout_if_follower();

        let mut log_changed = false;
        let reconcile_result = self.reconcile_log(&input, &mut log_changed);

        // Whatever we changed is durable before the leader hears back, including on rejection.
        if dirty || log_changed {
            self.persist().map_err(AppendEntriesError::ServerIoError)?;
        }
        let index_of_last_new_entry = reconcile_result?;

        // 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
        if let (Some(leader_commit_index), Some(index_of_last_new_entry)) =
            (input.leader_commit_index, index_of_last_new_entry)
        {
            let new_commit_index = cmp::min(leader_commit_index, index_of_last_new_entry);
            self.write_ahead_log
                .ratchet_fwd_commit_index_if_greater(new_commit_index);
        }

        // > If commitIndex > lastApplied: increment lastApplied, apply
        // > log[lastApplied] to state machine (§5.3)
        self.write_ahead_log.apply_all_committed_entries();

        Ok(AppendEntriesOutput {
            current_term: self.local_state.current_term(),
        })
    }

    /// Steps 2 to 4 of AppendEntries. Returns the index of the last entry the leader vouched for
    /// in this request.
    fn reconcile_log(
        &mut self,
        input: &AppendEntriesInput,
        log_changed: &mut bool,
    ) -> Result<Option<Index>, AppendEntriesError> {
        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        if let Some((leader_prev_entry_term, leader_prev_entry_index)) = input.leader_previous_log_entry {
            let my_prev_entry = self
                .write_ahead_log
                .read(leader_prev_entry_index)
                .map_err(AppendEntriesError::ServerIoError)?;
            match my_prev_entry {
                Some(entry) if entry.term == leader_prev_entry_term => { /* match */ }
                Some(entry) => {
                    let conflict_index = self
                        .write_ahead_log
                        .first_index_of_term_ending_at(entry.term, leader_prev_entry_index)
                        .map_err(AppendEntriesError::ServerIoError)?;
                    return Err(AppendEntriesError::ServerMissingPreviousLogEntry(ConflictHint {
                        current_term: self.local_state.current_term(),
                        conflict_term: Some(entry.term),
                        conflict_index,
                    }));
                }
                None => {
                    return Err(AppendEntriesError::ServerMissingPreviousLogEntry(ConflictHint {
                        current_term: self.local_state.current_term(),
                        conflict_term: None,
                        conflict_index: self.write_ahead_log.next_index(),
                    }));
                }
            }
        }

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let mut next_entry_index = match input.leader_previous_log_entry {
            None => Index::start_index(),
            Some((_, leader_prev_entry_index)) => leader_prev_entry_index.plus(1),
        };
        for new_entry in input.new_entries.iter() {
            let opt_existing_entry = self
                .write_ahead_log
                .read(next_entry_index)
                .map_err(AppendEntriesError::ServerIoError)?;

            let should_append = match opt_existing_entry {
                // 4. (no-op) Duplicate or reordered request, we already have it.
                Some(existing_entry) if existing_entry.term == new_entry.term => false,
                // 3. (delete)
                Some(_) => {
                    slog::info!(self.logger, "Truncating conflicting log from {:?}", next_entry_index);
                    self.write_ahead_log
                        .truncate(next_entry_index)
                        .map_err(AppendEntriesError::ServerIoError)?;
                    true
                }
                None => true,
            };

            // 4. (append)
            if should_append {
                let appended_index = self
                    .write_ahead_log
                    .append(new_entry.clone())
                    .map_err(AppendEntriesError::ServerIoError)?;
                assert_eq!(
                    appended_index, next_entry_index,
                    "Appended log entry to unexpected index."
                );
                *log_changed = true;
            }

            next_entry_index = next_entry_index.plus(1);
        }

        Ok(next_entry_index.checked_minus(1))
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer) {
        let peer_id = reply.descriptor.peer_id;
        let logger = self
            .logger
            .new(slog::o!("Peer" => format!("{:?}", peer_id), "SeqNo" => reply.descriptor.seq_no));
        slog::debug!(logger, "AE reply from peer result: {:?}", reply.result);

        // 1. Check for stale term rejection
        if let Err(AppendEntriesReplyFromPeerError::StaleTerm { new_term }) = &reply.result {
            if self.observe_term(*new_term, None) {
                slog::info!(logger, "Rejected by peer because my term is stale. Transitioned to follower.");
                // Halts on failure.
                let _ = self.persist();
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.descriptor.term {
            slog::info!(
                logger,
                "Received AE reply for outdated term {:?}, but we're on term {:?}",
                reply.descriptor.term,
                current_term
            );
            return;
        }

        let peer_log_update = match reply.result {
            Err(AppendEntriesReplyFromPeerError::StaleTerm { .. }) => {
                slog::warn!(logger, "Peer rejected our term without a newer one. Treating as generic failure.");
                PeerStateUpdate::OtherError
            }
            Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry { conflict_index }) => {
                slog::debug!(logger, "Peer is missing previous log entry. Hint: {:?}", conflict_index);
                PeerStateUpdate::PeerLogBehind { conflict_index }
            }
            Err(AppendEntriesReplyFromPeerError::RetryableFailure(err_msg)) => {
                // Next heartbeat retries.
                slog::debug!(logger, "AE failure: {}", err_msg);
                PeerStateUpdate::OtherError
            }
            Ok(()) => PeerStateUpdate::Success {
                previous_log_entry: reply.descriptor.previous_log_entry_index,
                num_entries_replicated: reply.descriptor.num_log_entries,
            },
        };
        let made_progress = !matches!(peer_log_update, PeerStateUpdate::OtherError);

        // 2. Update peer log tracker
        let next_index = match self.election_state.leader_state_mut() {
            None => {
                slog::info!(logger, "No longer leader");
                return;
            }
            Some(leader_state) => match leader_state.peer_state_mut(&peer_id) {
                None => {
                    slog::warn!(logger, "Peer not found while handling AE reply");
                    return;
                }
                Some(peer_state) => {
                    peer_state.handle_append_entries_result(&logger, reply.descriptor.seq_no, peer_log_update);
                    peer_state.next_and_previous_log_index().0
                }
            },
        };

        // 3. Check for majority replication and apply new commits.
        self.try_advance_commit_index();

        // 4. Keep going while the peer is behind.
        // > If last log index ≥ nextIndex for a follower: send
        // > AppendEntries RPC with log entries starting at nextIndex
        if made_progress && matches!(self.write_ahead_log.latest_index(), Some(latest) if latest >= next_index) {
            self.replicate_to_peer(peer_id, current_term);
        }
    }

    /// Leader only.
    ///
    /// > If there exists an N such that N > commitIndex, a majority
    /// > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
    /// > set commitIndex = N (§5.3, §5.4).
    ///
    /// See also:
    /// > Figure 8: A time sequence showing why a leader cannot determine
    /// > commitment using log entries from older terms.
    fn try_advance_commit_index(&mut self) {
        let latest_index = match self.write_ahead_log.latest_index() {
            Some(latest_index) => latest_index,
            None => return,
        };
        let mut matched_indexes = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state.peers_matched_indexes(),
            None => return,
        };
        matched_indexes.push(Some(latest_index));

        let tentative_new_commit_index =
            match get_cluster_commit_index(matched_indexes, self.cluster_tracker.majority_count()) {
                Some(index) => index,
                None => return,
            };

        match self
            .write_ahead_log
            .ratchet_fwd_commit_index_if_valid(tentative_new_commit_index, self.local_state.current_term())
        {
            Ok(true) => {
                slog::debug!(self.logger, "Commit index is now {:?}", tentative_new_commit_index);
                self.write_ahead_log.apply_all_committed_entries();
            }
            Ok(false) => {}
            Err(ioe) => slog::warn!(
                self.logger,
                "IO failure while confirming new commit index {:?}: {:?}",
                tentative_new_commit_index,
                ioe
            ),
        }
    }

    pub(crate) fn handle_leader_timer(&mut self, tick: LeaderTimerTick) {
        let current_term = self.local_state.current_term();
        if current_term != tick.term {
            slog::debug!(
                self.logger,
                "Received leader heartbeat for outdated term {:?}, current term: {:?}",
                tick.term,
                current_term
            );
            return;
        }

        self.replicate_to_peer(tick.peer_id, current_term);
    }

    fn replicate_to_peer(&mut self, peer_id: ReplicaId, current_term: Term) {
        match self.try_replicate_to_peer(peer_id, current_term) {
            Ok(()) => {}
            Err(ReplicateError::NoLongerLeader) => {
                slog::info!(self.logger, "Received leader timer event but no longer leader.")
            }
            Err(ReplicateError::PeerConcurrencyThrottle) => {
                slog::trace!(self.logger, "Request to peer {:?} is still outstanding", peer_id)
            }
            Err(ReplicateError::DiskRead(ioe)) => {
                slog::error!(self.logger, "Failed to read log for peer {:?}: {:?}", peer_id, ioe);
            }
            Err(ReplicateError::UnexpectedMissingLogEntry(index)) => {
                slog::error!(
                    self.logger,
                    "Tracking index {:?} for peer {:?}, but entry is missing from log.",
                    index,
                    peer_id
                );
            }
            Err(ReplicateError::UnknownPeer) => {
                slog::error!(self.logger, "Peer {:?} is missing in LeaderStateTracker", peer_id)
            }
        }
    }

    fn try_replicate_to_peer(&mut self, peer_id: ReplicaId, current_term: Term) -> Result<(), ReplicateError> {
        let peer_state = self
            .election_state
            .leader_state_mut()
            .ok_or(ReplicateError::NoLongerLeader)?
            .peer_state_mut(&peer_id)
            .ok_or(ReplicateError::UnknownPeer)?;

        let (request, descriptor) = append_entries_request::new_append_entries_request(
            current_term,
            self.my_replica_id,
            peer_id,
            peer_state,
            &self.write_ahead_log,
            self.max_entries_per_append,
        )?;

        tokio::task::spawn(peer_calls::append_entries(
            self.logger.clone(),
            self.transport.clone(),
            request,
            self.rpc_timeout,
            self.actor_client.clone(),
            descriptor,
        ));

        peer_state.reset_heartbeat_timer();

        Ok(())
    }

    pub(crate) fn handle_election_timeout(&mut self, term: Term) {
        let current_term = self.local_state.current_term();
        if current_term != term || self.election_state.is_leader() {
            slog::debug!(
                self.logger,
                "Ignoring stale election timeout for term {:?}. Election state: {:?}",
                term,
                self.election_state
            );
            return;
        }

        // Write-ahead log style: Vote for self on local state before transitioning to candidate.
        let new_term = self.local_state.increment_term_and_vote_for_self();
        if self.persist().is_err() {
            return;
        }
        self.election_state.transition_to_candidate_and_vote_for_self(new_term);
        slog::info!(
            self.logger,
            "Election timeout. Changed to candidate. Election state: {:?}",
            self.election_state,
        );

        if self.cluster_tracker.majority_count() <= 1 {
            self.become_leader(new_term);
            return;
        }

        let request = self.new_request_vote_request(new_term);
        for peer_id in self.cluster_tracker.peer_ids().iter().copied() {
            tokio::task::spawn(peer_calls::request_vote(
                self.logger.clone(),
                self.transport.clone(),
                peer_id,
                request.clone(),
                self.rpc_timeout,
                Duration::from_millis(0),
                self.actor_client.clone(),
                new_term,
            ));
        }
    }

    fn new_request_vote_request(&self, term: Term) -> RequestVoteRequest {
        let (last_log_term, last_log_index) = match self.write_ahead_log.latest_entry() {
            None => (0, 0),
            Some((term, index)) => (term.as_u64(), index.as_u64()),
        };

        RequestVoteRequest {
            term: term.as_u64(),
            candidate_id: self.my_replica_id,
            last_log_index,
            last_log_term,
        }
    }
}

/// `matched_indexes` holds every voting member's matched index, the leader's own included.
/// Returns the highest index a majority has.
fn get_cluster_commit_index(mut matched_indexes: Vec<Option<Index>>, majority: usize) -> Option<Index> {
    if majority == 0 || majority > matched_indexes.len() {
        return None;
    }
    // None sorts first.
    matched_indexes.sort();

    // Everything at or right of the quorum index is matched by at least `majority` members.
    let quorum_idx = matched_indexes.len() - majority;
    matched_indexes[quorum_idx]
}

enum ReplicateError {
    NoLongerLeader,
    PeerConcurrencyThrottle,
    DiskRead(io::Error),
    UnexpectedMissingLogEntry(Index),
    UnknownPeer,
}

mod append_entries_request {
    use crate::commitlog::{Index, Log};
    use crate::replica::election::PeerState;
    use super::ReplicateError;
    use crate::replica::replica_api::AppendEntriesReplyFromPeerDescriptor;
    use crate::replica::write_ahead_log::{WriteAheadLog, WriteAheadLogEntry};
    use crate::replica::{ReplicaId, Term};
    use crate::transport::{AppendEntriesRequest, LogEntry};

    pub(super) fn new_append_entries_request<L>(
        current_term: Term,
        my_id: ReplicaId,
        peer_id: ReplicaId,
        peer_state: &mut PeerState,
        write_ahead_log: &WriteAheadLog<L>,
        max_entries: usize,
    ) -> Result<(AppendEntriesRequest, AppendEntriesReplyFromPeerDescriptor), ReplicateError>
    where
        L: Log<WriteAheadLogEntry>,
    {
        // Simplicity vs throughput tradeoff. We're just going to allow 1 outstanding request per
        // peer; no pipelining. Entries are still batched, so a lagging peer catches up quickly.
        if peer_state.has_outstanding_request() {
            return Err(ReplicateError::PeerConcurrencyThrottle);
        }

        let (next_index, opt_previous_index) = peer_state.next_and_previous_log_index();
        let opt_previous_log_entry_metadata = match opt_previous_index {
            None => None,
            Some(previous_index) => match write_ahead_log.read(previous_index) {
                Ok(Some(entry)) => Some((entry.term, previous_index)),
                Ok(None) => return Err(ReplicateError::UnexpectedMissingLogEntry(previous_index)),
                Err(e) => return Err(ReplicateError::DiskRead(e)),
            },
        };

        let new_entries = write_ahead_log
            .read_range(next_index, max_entries)
            .map_err(ReplicateError::DiskRead)?;

        // Only consume a seq no once we're sure to send.
        let seq_no = peer_state.next_seq_no();
        let descriptor = AppendEntriesReplyFromPeerDescriptor {
            peer_id,
            term: current_term,
            seq_no,
            previous_log_entry_index: opt_previous_index,
            num_log_entries: new_entries.len(),
        };

        let request = build_append_entries_request(
            current_term,
            my_id,
            opt_previous_log_entry_metadata,
            write_ahead_log.commit_index(),
            new_entries,
        );

        Ok((request, descriptor))
    }

    // This is the infallible parts of creating the request object.
    fn build_append_entries_request(
        current_term: Term,
        my_id: ReplicaId,
        previous_log_entry_metadata: Option<(Term, Index)>,
        commit_index: Option<Index>,
        new_entries: Vec<WriteAheadLogEntry>,
    ) -> AppendEntriesRequest {
        let (prev_log_term, prev_log_index) = match previous_log_entry_metadata {
            None => (0, 0),
            Some((term, idx)) => (term.as_u64(), idx.as_u64()),
        };

        let entries = new_entries
            .into_iter()
            .map(|entry| LogEntry {
                term: entry.term.as_u64(),
                command: entry.data,
            })
            .collect();

        AppendEntriesRequest {
            term: current_term.as_u64(),
            leader_id: my_id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: Index::option_as_u64(commit_index),
        }
    }
}

/// Remote calls, run on their own tasks. Replies go back to the actor as events.
mod peer_calls {
    use crate::actor::WeakActorClient;
    use crate::commitlog::Index;
    use crate::replica::replica_api::{
        AppendEntriesReplyFromPeer, AppendEntriesReplyFromPeerDescriptor, AppendEntriesReplyFromPeerError,
        RequestVoteReplyFromPeer, RequestVoteResult,
    };
    use crate::replica::{ReplicaId, Term};
    use crate::transport::{
        AppendEntriesReply, AppendEntriesRequest, PeerTransport, RequestVoteReply, RequestVoteRequest,
        TransportError,
    };
    use std::sync::Arc;
    use tokio::time::error::Elapsed;
    use tokio::time::Duration;

    pub(super) async fn append_entries(
        logger: slog::Logger,
        transport: Arc<dyn PeerTransport>,
        rpc_request: AppendEntriesRequest,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        descriptor: AppendEntriesReplyFromPeerDescriptor,
    ) {
        slog::trace!(logger, "ClientWire - AppendEntries to {:?}: {:?}", descriptor.peer_id, rpc_request);
        let rpc_reply = tokio::time::timeout(
            rpc_timeout,
            transport.append_entries(descriptor.peer_id, rpc_request),
        )
        .await;
        slog::trace!(logger, "ClientWire - {:?}", rpc_reply);

        let callback_input = AppendEntriesReplyFromPeer {
            result: convert_append_entries_rpc_reply(descriptor.term, rpc_reply),
            descriptor,
        };

        // Actor gone means we've been killed.
        let _ = callback.notify_append_entries_reply_from_peer(callback_input).await;
    }

    fn convert_append_entries_rpc_reply(
        request_term: Term,
        rpc_reply: Result<Result<AppendEntriesReply, TransportError>, Elapsed>,
    ) -> Result<(), AppendEntriesReplyFromPeerError> {
        match rpc_reply {
            Ok(Ok(reply)) if reply.term > request_term.as_u64() => Err(AppendEntriesReplyFromPeerError::StaleTerm {
                new_term: Term::new(reply.term),
            }),
            Ok(Ok(reply)) if reply.success => Ok(()),
            Ok(Ok(reply)) => Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry {
                conflict_index: Index::from_u64_or_none(reply.conflict_index),
            }),
            Ok(Err(transport_error)) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(format!(
                "AppendEntries RPC failed: {}",
                transport_error
            ))),
            Err(_timeout) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                "Timed out calling AppendEntries".into(),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) async fn request_vote(
        logger: slog::Logger,
        transport: Arc<dyn PeerTransport>,
        peer_id: ReplicaId,
        rpc_request: RequestVoteRequest,
        rpc_timeout: Duration,
        delay: Duration,
        callback: WeakActorClient,
        term: Term,
    ) {
        if delay > Duration::from_millis(0) {
            tokio::time::sleep(delay).await;
        }

        slog::debug!(logger, "ClientWire - RequestVote to {:?}: {:?}", peer_id, rpc_request);
        let rpc_reply = tokio::time::timeout(rpc_timeout, transport.request_vote(peer_id, rpc_request)).await;
        slog::debug!(logger, "ClientWire - {:?}", rpc_reply);

        let callback_input = RequestVoteReplyFromPeer {
            peer_id,
            term,
            result: convert_request_vote_rpc_reply(term, rpc_reply),
        };

        let _ = callback.notify_request_vote_reply_from_peer(callback_input).await;
    }

    fn convert_request_vote_rpc_reply(
        request_term: Term,
        rpc_reply: Result<Result<RequestVoteReply, TransportError>, Elapsed>,
    ) -> RequestVoteResult {
        match rpc_reply {
            Ok(Ok(reply)) if reply.term > request_term.as_u64() => RequestVoteResult::StaleTerm {
                new_term: Term::new(reply.term),
            },
            Ok(Ok(reply)) if reply.vote_granted => RequestVoteResult::VoteGranted,
            Ok(Ok(_)) => RequestVoteResult::VoteNotGranted,
            Ok(Err(_)) | Err(_) => RequestVoteResult::RetryableFailure,
        }
    }

}

use crate::commitlog::Index;
use crate::replica::election::timers::HeartbeatTimerHandle;
use crate::replica::ReplicaId;
use std::collections::HashMap;

pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_state: HashMap<ReplicaId, PeerState>) -> Self {
        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peers_matched_indexes(&self) -> Vec<Option<Index>> {
        self.peer_state.values().map(|peer_state| peer_state.matched()).collect()
    }
}

pub(crate) struct PeerState {
    // Held to send heartbeats for this peer
    heartbeat_timer_handle: HeartbeatTimerHandle,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Option<Index>,

    // SeqNo is a logical clock of a term leader's interactions with one peer. Each request takes
    // the next SeqNo and its reply is matched against it. A reply from earlier than one we've
    // already handled is discarded, and only one request is ever outstanding.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerState {
    pub(super) fn new(heartbeat_timer_handle: HeartbeatTimerHandle, latest_log_index: Option<Index>) -> Self {
        PeerState {
            heartbeat_timer_handle,
            next: latest_log_index
                .map(|i| i.plus(1))
                .unwrap_or_else(Index::start_index),
            matched: None,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Option<Index>) {
        (self.next, self.next.checked_minus(1))
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    pub(crate) fn handle_append_entries_result(
        &mut self,
        logger: &slog::Logger,
        received_seq_no: u64,
        update: PeerStateUpdate,
    ) {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            slog::warn!(logger, "Dropping out of date seq-no({:?}): {:?}", received_seq_no, update);
            return;
        }

        match update {
            PeerStateUpdate::OtherError => { /* No action */ }
            PeerStateUpdate::Success {
                previous_log_entry,
                num_entries_replicated,
            } => {
                self.update_log(previous_log_entry, num_entries_replicated);
            }
            PeerStateUpdate::PeerLogBehind { conflict_index } => {
                self.rewind_log(logger, conflict_index);
            }
        }
    }

    fn update_log(&mut self, previous_log_entry: Option<Index>, num_entries_replicated: usize) {
        let new_matched = match (previous_log_entry, num_entries_replicated) {
            // Heartbeat on an empty log confirms nothing.
            (None, 0) => return,
            (None, n) => Index::new_usize(n),
            // Zero entries still confirms the peer matches us up to `prev`.
            (Some(prev), n) => prev.plus(n as u64),
        };

        // Panic here, because it means as leader, we either sent something wrong or are tracking state wrong.
        if let Some(matched) = self.matched {
            assert!(
                new_matched >= matched,
                "Matched can only ratchet forward. CurrentMatched={:?}, NewMatched={:?}",
                matched,
                new_matched
            );
        }
        let new_next = new_matched.plus(1);
        assert!(
            new_next >= self.next,
            "Next can only ratchet forward on success. CurrentNext={:?}, NewNext={:?}",
            self.next,
            new_next
        );

        self.next = new_next;
        self.matched.replace(new_matched);
    }

    fn rewind_log(&mut self, logger: &slog::Logger, conflict_index: Option<Index>) {
        // Never rewind past what the peer already confirmed. Don't panic, peer could reply with
        // garbage.
        let floor = self.matched.map(|m| m.plus(1)).unwrap_or_else(Index::start_index);
        let ceiling = match self.next.checked_minus(1) {
            Some(ceiling) if ceiling >= floor => ceiling,
            _ => {
                slog::warn!(
                    logger,
                    "Can't rewind peer log. Next={:?}, Matched={:?}",
                    self.next,
                    self.matched
                );
                return;
            }
        };

        // Without a hint, step back one entry at a time.
        self.next = conflict_index.unwrap_or(ceiling).clamp(floor, ceiling);
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset_heartbeat_timer(&self) {
        self.heartbeat_timer_handle.reset_heartbeat_timer();
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success {
        previous_log_entry: Option<Index>,
        num_entries_replicated: usize,
    },
    PeerLogBehind {
        conflict_index: Option<Index>,
    },
    OtherError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::{LeaderTimerTick, Term};
    use std::time::Duration;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    // Heartbeat timer is irrelevant here. Keep it from ever ticking after the first one.
    fn peer_state(actor_client: &ActorClient, latest_log_index: u64) -> PeerState {
        let handle = HeartbeatTimerHandle::spawn_timer_task(
            Duration::from_secs(3600),
            actor_client.weak(),
            LeaderTimerTick {
                peer_id: ReplicaId::new(1),
                term: Term::new(1),
            },
        );
        PeerState::new(handle, Index::from_u64_or_none(latest_log_index))
    }

    fn reply(peer: &mut PeerState, update: PeerStateUpdate) {
        let seq_no = peer.next_seq_no();
        assert!(peer.has_outstanding_request());
        peer.handle_append_entries_result(&logger(), seq_no, update);
        assert!(!peer.has_outstanding_request());
    }

    #[tokio::test]
    async fn new_peer_starts_after_leader_log() {
        let (actor_client, _rx) = ActorClient::new(10);

        let peer = peer_state(&actor_client, 0);
        assert_eq!((Index::new(1), None), peer.next_and_previous_log_index());

        let peer = peer_state(&actor_client, 7);
        assert_eq!((Index::new(8), Some(Index::new(7))), peer.next_and_previous_log_index());
        assert_eq!(None, peer.matched());
    }

    #[tokio::test]
    async fn success_ratchets_matched() {
        let (actor_client, _rx) = ActorClient::new(10);
        let mut peer = peer_state(&actor_client, 5);

        // Heartbeat success confirms prev.
        reply(
            &mut peer,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(5)),
                num_entries_replicated: 0,
            },
        );
        assert_eq!(Some(Index::new(5)), peer.matched());
        assert_eq!(Index::new(6), peer.next_and_previous_log_index().0);

        reply(
            &mut peer,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(5)),
                num_entries_replicated: 3,
            },
        );
        assert_eq!(Some(Index::new(8)), peer.matched());
        assert_eq!(Index::new(9), peer.next_and_previous_log_index().0);
    }

    #[tokio::test]
    async fn rewind_uses_hint_within_bounds() {
        let (actor_client, _rx) = ActorClient::new(10);
        let mut peer = peer_state(&actor_client, 10);

        // No hint, step back by one.
        reply(&mut peer, PeerStateUpdate::PeerLogBehind { conflict_index: None });
        assert_eq!(Index::new(10), peer.next_and_previous_log_index().0);

        reply(
            &mut peer,
            PeerStateUpdate::PeerLogBehind {
                conflict_index: Some(Index::new(4)),
            },
        );
        assert_eq!(Index::new(4), peer.next_and_previous_log_index().0);

        // Hint beyond current next is clamped to a step back.
        reply(
            &mut peer,
            PeerStateUpdate::PeerLogBehind {
                conflict_index: Some(Index::new(50)),
            },
        );
        assert_eq!(Index::new(3), peer.next_and_previous_log_index().0);

        // Can't rewind below what's matched.
        reply(
            &mut peer,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(2)),
                num_entries_replicated: 0,
            },
        );
        reply(
            &mut peer,
            PeerStateUpdate::PeerLogBehind {
                conflict_index: Some(Index::new(1)),
            },
        );
        assert_eq!(Index::new(3), peer.next_and_previous_log_index().0);
    }

    #[tokio::test]
    async fn stale_seq_no_dropped() {
        let (actor_client, _rx) = ActorClient::new(10);
        let mut peer = peer_state(&actor_client, 3);

        let first = peer.next_seq_no();
        let second = peer.next_seq_no();
        peer.handle_append_entries_result(
            &logger(),
            second,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(3)),
                num_entries_replicated: 0,
            },
        );
        peer.handle_append_entries_result(&logger(), first, PeerStateUpdate::PeerLogBehind { conflict_index: None });

        assert_eq!(Some(Index::new(3)), peer.matched());
        assert_eq!(Index::new(4), peer.next_and_previous_log_index().0);
    }
}

use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::replica::election::state_change_listener::{NodeStateListener, NodeStateNotifier, NodeStateSnapshot, Role};
use crate::replica::election::timers::{ElectionTimerHandle, HeartbeatTimerHandle};
use crate::replica::election::{state_change_listener, LeaderStateTracker, PeerState};
use crate::replica::{LeaderTimerTick, ReplicaId, Term};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_replica_id: ReplicaId,
    pub leader_heartbeat_duration: Duration,
    pub election_timeout_range: RangeInclusive<Duration>,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    // Term of the current `state`. Only used to describe ourselves to listeners.
    term: Term,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    state_change_notifier: NodeStateNotifier,
}

pub(crate) enum CurrentLeader {
    Me,
    Other(ReplicaId),
    Unknown,
}

impl ElectionState {
    /// Every replica starts out as a follower, including one restarted with a persisted term.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        actor_client: WeakActorClient,
        term: Term,
    ) -> (Self, NodeStateListener) {
        let initial_state = State::Follower(FollowerState::new(None, &config, actor_client.clone(), term));
        let (notifier, listener) = state_change_listener::new(Self::snapshot_impl(&initial_state, term, &config));

        let election_state = ElectionState {
            state: initial_state,
            term,
            config,
            actor_client,
            state_change_notifier: notifier,
        };

        (election_state, listener)
    }

    pub(crate) fn transition_to_follower(&mut self, term: Term, new_leader: Option<ReplicaId>) {
        self.state = State::Follower(FollowerState::new(
            new_leader,
            &self.config,
            self.actor_client.clone(),
            term,
        ));
        self.term = term;
        self.notify_new_state();
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self, term: Term) {
        let mut cs = CandidateState::new(&self.config, self.actor_client.clone(), term);

        // Vote for self
        cs.add_received_vote(self.config.my_replica_id);

        self.state = State::Candidate(cs);
        self.term = term;
        self.notify_new_state();
    }

    pub(crate) fn transition_to_leader(&mut self, term: Term, peer_ids: &[ReplicaId], latest_log_index: Option<Index>) {
        self.state = State::Leader(LeaderState::new(
            peer_ids,
            latest_log_index,
            self.config.leader_heartbeat_duration,
            self.actor_client.clone(),
            term,
        ));
        self.term = term;
        self.notify_new_state();
    }

    pub(crate) fn current_leader(&self) -> CurrentLeader {
        match &self.state {
            State::Leader(_) => CurrentLeader::Me,
            State::Candidate(_) => CurrentLeader::Unknown,
            State::Follower(FollowerState { leader: Some(leader), .. }) => CurrentLeader::Other(*leader),
            State::Follower(FollowerState { leader: None, .. }) => CurrentLeader::Unknown,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(crate) fn current_state(&self) -> NodeStateSnapshot {
        Self::snapshot_impl(&self.state, self.term, &self.config)
    }

    fn snapshot_impl(state: &State, term: Term, config: &ElectionConfig) -> NodeStateSnapshot {
        let (role, leader) = match state {
            State::Leader(_) => (Role::Leader, Some(config.my_replica_id)),
            State::Candidate(_) => (Role::Candidate, None),
            State::Follower(fs) => (Role::Follower, fs.leader),
        };

        NodeStateSnapshot {
            term: term.as_u64(),
            role,
            leader,
        }
    }

    fn notify_new_state(&self) {
        self.state_change_notifier.notify_new_state(self.current_state());
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.election_timer.reset_timeout();
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader: ReplicaId) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader);
                self.notify_new_state();
            }
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            Some(cs.add_received_vote(vote_from))
        } else {
            None
        }
    }

    pub(crate) fn is_candidate(&self) -> bool {
        matches!(self.state, State::Candidate(_))
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(ls) = &mut self.state {
            Some(&mut ls.tracker)
        } else {
            None
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader(Term={:?})", self.term),
            State::Candidate(_) => write!(f, "Candidate(Term={:?})", self.term),
            State::Follower(FollowerState { leader, .. }) => {
                write!(f, "Follower(Term={:?}, Leader={:?})", self.term, leader)
            }
        }
    }
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct LeaderState {
    tracker: LeaderStateTracker,
}

struct CandidateState {
    received_votes_from: HashSet<ReplicaId>,
    // Fires the next election round if this one doesn't conclude.
    _election_timer: ElectionTimerHandle,
}

struct FollowerState {
    leader: Option<ReplicaId>,
    election_timer: ElectionTimerHandle,
}

impl LeaderState {
    fn new(
        peer_ids: &[ReplicaId],
        latest_log_index: Option<Index>,
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        term: Term,
    ) -> Self {
        let mut peer_state = HashMap::with_capacity(peer_ids.len());
        for peer_id in peer_ids.iter().copied() {
            let heartbeat_timer_handle = HeartbeatTimerHandle::spawn_timer_task(
                heartbeat_duration,
                actor_client.clone(),
                LeaderTimerTick { peer_id, term },
            );
            peer_state.insert(peer_id, PeerState::new(heartbeat_timer_handle, latest_log_index));
        }

        LeaderState {
            tracker: LeaderStateTracker::new(peer_state),
        }
    }
}

impl CandidateState {
    fn new(config: &ElectionConfig, actor_client: WeakActorClient, term: Term) -> Self {
        CandidateState {
            received_votes_from: HashSet::with_capacity(3),
            _election_timer: ElectionTimerHandle::spawn_timer_task(
                config.election_timeout_range.clone(),
                actor_client,
                term,
            ),
        }
    }

    /// `add_received_vote()` returns the number of unique votes we've received after adding the
    /// provided `vote_from`
    fn add_received_vote(&mut self, vote_from: ReplicaId) -> usize {
        self.received_votes_from.insert(vote_from);
        self.received_votes_from.len()
    }
}

impl FollowerState {
    fn new(leader: Option<ReplicaId>, config: &ElectionConfig, actor_client: WeakActorClient, term: Term) -> Self {
        FollowerState {
            leader,
            election_timer: ElectionTimerHandle::spawn_timer_task(
                config.election_timeout_range.clone(),
                actor_client,
                term,
            ),
        }
    }
}

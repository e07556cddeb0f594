//! The replica's event loop. Everything that touches replica state is an `Event` handled one at a
//! time by `ReplicaActor`. That queue is the replica's only lock.
use crate::commitlog;
use crate::replica;
use crate::replica::Term;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub(crate) enum Event {
    // Leader: Append to log, persist, replicate eagerly.
    // Candidate/Follower: Reject with leader hint.
    Start(
        replica::StartInput,
        Callback<replica::StartOutput, replica::StartError>,
    ),

    // Any: Adopt higher term. Grant vote if applicable (persisted before reply).
    RequestVote(
        replica::RequestVoteInput,
        Callback<replica::RequestVoteOutput, replica::RequestVoteError>,
    ),

    // Candidate: Count vote, transition to leader on majority.
    // Leader/Follower: Discard, unless it carries a higher term.
    RequestVoteReplyFromPeer(replica::RequestVoteReplyFromPeer),

    // Any: Adopt leader's term and become follower. Reconcile log (persisted before reply).
    AppendEntries(
        replica::AppendEntriesInput,
        Callback<replica::AppendEntriesOutput, replica::AppendEntriesError>,
    ),

    // Leader: Update peer progress, advance commit index, re-send if peer lags.
    // Candidate/Follower: Discard, unless it carries a higher term.
    AppendEntriesReplyFromPeer(replica::AppendEntriesReplyFromPeer),

    // Leader: Send AppendEntries to one peer.
    // Candidate/Follower: Discard (stale timer).
    LeaderTimer(replica::LeaderTimerTick),

    // Follower/Candidate: Start a new election.
    // Leader: Discard (stale timer).
    ElectionTimeout(Term),
}

pub(crate) struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub fn send(self, message: Result<O, E>) {
        // Caller may have given up waiting.
        let _ = self.0.send(message);
    }
}

impl<O: Debug, E: Error> Debug for Callback<O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback")
    }
}

/// Returned by notify-style calls when the actor is no longer running.
#[derive(Debug, thiserror::Error)]
#[error("Replica actor has exited")]
pub(crate) struct ActorExited;

/// Keeps the actor alive. Held by the application facing handle.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// Doesn't keep the actor alive. Held by the replica itself, its timers and its RPC handler.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);

        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn start(&self, input: replica::StartInput) -> Result<replica::StartOutput, replica::StartError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Event::Start(input, Callback(tx))).await.is_err() {
            return Err(replica::StartError::ActorExited);
        }

        rx.await.unwrap_or(Err(replica::StartError::ActorExited))
    }
}

impl WeakActorClient {
    fn upgrade(&self) -> Result<mpsc::Sender<Event>, ActorExited> {
        self.sender.upgrade().ok_or(ActorExited)
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        self.upgrade()?.send(event).await.map_err(|_| ActorExited)
    }

    pub(crate) async fn request_vote(
        &self,
        input: replica::RequestVoteInput,
    ) -> Result<replica::RequestVoteOutput, replica::RequestVoteError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::RequestVote(input, Callback(tx)))
            .await
            .map_err(|_| replica::RequestVoteError::ActorExited)?;

        rx.await.unwrap_or(Err(replica::RequestVoteError::ActorExited))
    }

    pub(crate) async fn append_entries(
        &self,
        input: replica::AppendEntriesInput,
    ) -> Result<replica::AppendEntriesOutput, replica::AppendEntriesError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::AppendEntries(input, Callback(tx)))
            .await
            .map_err(|_| replica::AppendEntriesError::ActorExited)?;

        rx.await.unwrap_or(Err(replica::AppendEntriesError::ActorExited))
    }

    pub(crate) async fn notify_request_vote_reply_from_peer(
        &self,
        reply: replica::RequestVoteReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::RequestVoteReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_append_entries_reply_from_peer(
        &self,
        reply: replica::AppendEntriesReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::AppendEntriesReplyFromPeer(reply)).await
    }

    pub(crate) async fn leader_timer(&self, tick: replica::LeaderTimerTick) -> Result<(), ActorExited> {
        self.send(Event::LeaderTimer(tick)).await
    }

    pub(crate) async fn election_timeout(&self, term: Term) -> Result<(), ActorExited> {
        self.send(Event::ElectionTimeout(term)).await
    }
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<L>
where
    L: commitlog::Log<replica::WriteAheadLogEntry>,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: replica::Replica<L>,
    kill_switch: CancellationToken,
}

impl<L> ReplicaActor<L>
where
    L: commitlog::Log<replica::WriteAheadLogEntry>,
{
    pub(crate) fn new(
        logger: slog::Logger,
        receiver: mpsc::Receiver<Event>,
        replica: replica::Replica<L>,
        kill_switch: CancellationToken,
    ) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
            kill_switch,
        }
    }

    /// Runs until killed, until every strong `ActorClient` is dropped, or until the replica halts
    /// itself. Dropping the replica on exit stops its timers and closes the commit stream.
    pub(crate) async fn run_event_loop(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.kill_switch.cancelled() => break,
                event = self.receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            self.handle_event(event);

            if self.replica.is_halted() {
                slog::crit!(self.logger, "Replica halted itself. Shutting down.");
                self.kill_switch.cancel();
                break;
            }
        }

        slog::info!(self.logger, "Replica event loop has exited.");
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and/or come as a callback to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start(input, callback) => {
                let result = self.replica.handle_start(input);
                callback.send(result);
            }
            Event::RequestVote(input, callback) => {
                let result = self.replica.server_handle_request_vote(input);
                callback.send(result);
            }
            Event::RequestVoteReplyFromPeer(reply) => {
                self.replica.handle_request_vote_reply_from_peer(reply);
            }
            Event::AppendEntries(input, callback) => {
                let result = self.replica.server_handle_append_entries(input);
                callback.send(result);
            }
            Event::AppendEntriesReplyFromPeer(reply) => {
                self.replica.handle_append_entries_reply_from_peer(reply);
            }
            Event::LeaderTimer(tick) => {
                self.replica.handle_leader_timer(tick);
            }
            Event::ElectionTimeout(term) => {
                self.replica.handle_election_timeout(term);
            }
        }
    }
}

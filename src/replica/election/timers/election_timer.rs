use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::Term;
use rand::Rng;
use std::ops::RangeInclusive;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Owned by a follower or candidate. While the handle lives, the timer task fires
/// `ElectionTimeout(term)` at the actor whenever the deadline passes without a reset. Dropping the
/// handle stops the task.
pub(crate) struct ElectionTimerHandle<C: Clock = RealClock> {
    deadline: watch::Sender<Instant>,
    timeout_range: RangeInclusive<Duration>,
    clock: C,
}

struct ElectionTimerTask<C: Clock> {
    deadline: watch::Receiver<Instant>,
    actor_client: WeakActorClient,
    term: Term,
    clock: C,
    // If the actor keeps us around after a timeout (e.g. the event was stale by the time it was
    // handled), wait this long before firing again.
    refire_backoff: Duration,
}

impl ElectionTimerHandle {
    pub(crate) fn spawn_timer_task(
        timeout_range: RangeInclusive<Duration>,
        actor_client: WeakActorClient,
        term: Term,
    ) -> Self {
        let (task, handle) = ElectionTimerTask::new(timeout_range, actor_client, term, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> ElectionTimerHandle<C> {
    /// Push the deadline out by a freshly drawn random timeout.
    pub(crate) fn reset_timeout(&self) {
        let _ = self.deadline.send(random_deadline(&self.clock, &self.timeout_range));
    }
}

fn random_deadline<C: Clock>(clock: &C, timeout_range: &RangeInclusive<Duration>) -> Instant {
    let timeout = rand::thread_rng().gen_range(timeout_range.clone());
    clock.now() + timeout
}

impl<C: Clock> ElectionTimerTask<C> {
    fn new(
        timeout_range: RangeInclusive<Duration>,
        actor_client: WeakActorClient,
        term: Term,
        clock: C,
    ) -> (Self, ElectionTimerHandle<C>) {
        // Timer starts armed, otherwise a new follower could time out immediately.
        let (tx, rx) = watch::channel(random_deadline(&clock, &timeout_range));

        let task = ElectionTimerTask {
            deadline: rx,
            actor_client,
            term,
            clock: clock.clone(),
            refire_backoff: *timeout_range.start(),
        };
        let handle = ElectionTimerHandle {
            deadline: tx,
            timeout_range,
            clock,
        };

        (task, handle)
    }

    async fn run(mut self) {
        let mut next_wake = *self.deadline.borrow_and_update();

        loop {
            tokio::select! {
                biased;
                changed = self.deadline.changed() => {
                    if changed.is_err() {
                        // Handle dropped. We're no longer a follower/candidate in this term.
                        return;
                    }
                    next_wake = *self.deadline.borrow_and_update();
                }
                _ = self.clock.sleep_until(next_wake) => {
                    if self.actor_client.election_timeout(self.term).await.is_err() {
                        return;
                    }
                    next_wake = self.clock.now() + self.refire_backoff;
                }
            }
        }
    }
}

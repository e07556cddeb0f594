use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::LeaderTimerTick;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// One per peer while we're leader. The task ticks immediately on spawn, so a new leader
/// announces itself right away, then once per heartbeat unless `reset_heartbeat_timer()` pushes
/// the next tick out.
pub(crate) struct HeartbeatTimerHandle<C: Clock = RealClock> {
    next_heartbeat: watch::Sender<Instant>,
    heartbeat_duration: Duration,
    clock: C,
}

struct HeartbeatTimerTask<C: Clock> {
    next_heartbeat: watch::Receiver<Instant>,
    heartbeat_duration: Duration,
    actor_client: WeakActorClient,
    event: LeaderTimerTick,
    clock: C,
}

impl HeartbeatTimerHandle {
    pub(crate) fn spawn_timer_task(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        event: LeaderTimerTick,
    ) -> Self {
        let (task, handle) = HeartbeatTimerTask::new(heartbeat_duration, actor_client, event, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> HeartbeatTimerHandle<C> {
    /// Call after sending anything to this peer.
    pub(crate) fn reset_heartbeat_timer(&self) {
        let _ = self.next_heartbeat.send(self.clock.now() + self.heartbeat_duration);
    }
}

impl<C: Clock> HeartbeatTimerTask<C> {
    fn new(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        event: LeaderTimerTick,
        clock: C,
    ) -> (Self, HeartbeatTimerHandle<C>) {
        let (tx, rx) = watch::channel(clock.now());

        let task = HeartbeatTimerTask {
            next_heartbeat: rx,
            heartbeat_duration,
            actor_client,
            event,
            clock: clock.clone(),
        };
        let handle = HeartbeatTimerHandle {
            next_heartbeat: tx,
            heartbeat_duration,
            clock,
        };

        (task, handle)
    }

    async fn run(mut self) {
        let mut next_wake = *self.next_heartbeat.borrow_and_update();

        loop {
            tokio::select! {
                biased;
                changed = self.next_heartbeat.changed() => {
                    if changed.is_err() {
                        // Handle dropped. We're no longer leader for this term.
                        return;
                    }
                    next_wake = *self.next_heartbeat.borrow_and_update();
                }
                _ = self.clock.sleep_until(next_wake) => {
                    if self.actor_client.leader_timer(self.event.clone()).await.is_err() {
                        return;
                    }
                    next_wake = self.clock.now() + self.heartbeat_duration;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::clock;
    use crate::replica::election::timers::test_utils::TestUtilActor;
    use crate::replica::{ReplicaId, Term};

    fn tick() -> LeaderTimerTick {
        LeaderTimerTick {
            peer_id: ReplicaId::new(2),
            term: Term::new(10),
        }
    }

    #[tokio::test]
    async fn heartbeat_timer_lifecycle() {
        // -- setup --
        let heartbeat = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = clock::mocked_clock();

        // -- execute & verify --

        // 1. First tick is immediate.
        let (timer_task, timer_handle) =
            HeartbeatTimerTask::new(heartbeat, strong_actor_client.weak(), tick(), mock_clock);
        let task_join_handle = tokio::task::spawn(timer_task.run());
        actor.assert_leader_heartbeat_event(tick()).await;
        actor.assert_no_event().await;

        // 2. Then one per heartbeat.
        for _ in 0..5 {
            mock_clock_controller.advance(heartbeat);
            actor.assert_leader_heartbeat_event(tick()).await;
            actor.assert_no_event().await;
        }

        // 3. A big leap still produces a single tick.
        mock_clock_controller.advance(heartbeat * 5);
        actor.assert_leader_heartbeat_event(tick()).await;
        actor.assert_no_event().await;

        // 4. Dropping the handle stops the task.
        drop(timer_handle);
        mock_clock_controller.advance(heartbeat);
        task_join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn heartbeat_timer_reset_postpones_tick() {
        let heartbeat = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = clock::mocked_clock();

        let (timer_task, timer_handle) =
            HeartbeatTimerTask::new(heartbeat, strong_actor_client.weak(), tick(), mock_clock);
        tokio::task::spawn(timer_task.run());
        actor.assert_leader_heartbeat_event(tick()).await;

        // Reset every half heartbeat. No ticks.
        for _ in 0..5 {
            mock_clock_controller.advance(heartbeat / 2);
            timer_handle.reset_heartbeat_timer();
        }
        actor.assert_no_event().await;
        assert_eq!(mock_clock_controller.elapsed_time(), heartbeat * 5 / 2);

        // Last reset at T=2.5, so tick at T=3.5.
        mock_clock_controller.advance(heartbeat / 2);
        actor.assert_no_event().await;
        mock_clock_controller.advance(heartbeat / 2);
        actor.assert_leader_heartbeat_event(tick()).await;
    }
}

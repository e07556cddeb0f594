#[cfg(test)]
use tokio::sync::watch;
#[cfg(test)]
use tokio::time::Duration;
use tokio::time::Instant;

/// Clock is the timers' only source of time, so tests can drive timers by hand.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(now);
    let clock = MockClock { current_time: rx };
    let controller = MockClockController {
        current_time: tx,
        time_of_instantiation: now,
    };

    (clock, controller)
}

/// Time only moves when the paired `MockClockController` says so.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    current_time: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.current_time.borrow_and_update() < deadline {
            if self.current_time.changed().await.is_err() {
                // Controller is gone, so time stands still forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    current_time: watch::Sender<Instant>,
    time_of_instantiation: Instant,
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn current_time(&self) -> Instant {
        *self.current_time.borrow()
    }

    pub(crate) fn elapsed_time(&self) -> Duration {
        self.current_time() - self.time_of_instantiation
    }

    /// Sleepers only promise to wake at or after their deadline. Advance in steps smaller than
    /// what the test wants to observe.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let new_now = self.current_time() + duration;
        let _ = self.current_time.send(new_now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_clock_wakes_sleepers_in_order() {
        let tick = Duration::from_millis(500);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (mut clock, mut controller) = mocked_clock();
        let start = controller.current_time();

        tokio::spawn(async move {
            let mut next_wake = start;
            loop {
                next_wake += tick;
                clock.sleep_until(next_wake).await;
                if tx.send(next_wake).is_err() {
                    return;
                }
            }
        });

        // Half-tick offset avoids off-by-one.
        controller.advance(tick / 2);
        tokio::time::timeout(tick * 2, rx.recv())
            .await
            .expect_err("Expected timeout");

        controller.advance(tick);
        assert_eq!(start + tick, rx.recv().await.unwrap());
        tokio::time::timeout(tick * 2, rx.recv())
            .await
            .expect_err("Expected timeout");

        // One big jump releases every sleeper it passes.
        controller.advance(tick * 3);
        for i in 2..=4 {
            assert_eq!(start + tick * i, rx.recv().await.unwrap());
        }
        tokio::time::timeout(tick * 2, rx.recv())
            .await
            .expect_err("Expected timeout");

        assert_eq!(controller.elapsed_time(), tick * 9 / 2);
    }
}

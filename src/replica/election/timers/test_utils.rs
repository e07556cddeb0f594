use crate::actor::Event;
use crate::replica::{LeaderTimerTick, Term};
use std::time::Duration;
use tokio::sync::mpsc;

/// Stands in for the replica actor and asserts on what timers send it.
pub(super) struct TestUtilActor {
    rx: mpsc::Receiver<Event>,
    no_event_wait: Duration,
}

impl TestUtilActor {
    pub(super) fn new(rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            rx,
            no_event_wait: Duration::from_millis(10),
        }
    }

    async fn recv(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected event")
    }

    pub(super) async fn assert_leader_heartbeat_event(&mut self, expected: LeaderTimerTick) {
        match self.recv().await {
            Event::LeaderTimer(tick) => assert_eq!(expected, tick),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_election_timeout_event(&mut self, expected_term: Term) {
        match self.recv().await {
            Event::ElectionTimeout(term) => assert_eq!(expected_term, term),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_no_event(&mut self) {
        tokio::time::timeout(self.no_event_wait, self.rx.recv())
            .await
            .expect_err("Expected no event");
    }
}

use crate::commitlog::Index;
use crate::replica::Term;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Write half of the committed-entry hand-off, owned by the write-ahead log. Unbounded so the
/// event loop never waits on a slow application.
///
/// Entries must be published gap free, starting at index 1. Anything else is refused, so the
/// application can never observe a hole or a reordering.
pub(crate) struct CommitStreamPublisher {
    sender: mpsc::UnboundedSender<CommittedEntry>,
    expected_index: Index,
}

/// Read half, drained by the apply pipeline. Ends once the publisher is dropped.
pub(crate) struct CommitStream {
    receiver: mpsc::UnboundedReceiver<CommittedEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommittedEntry {
    pub(crate) term: Term,
    pub(crate) index: Index,
    pub(crate) data: Bytes,
}

pub(crate) fn new() -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let publisher = CommitStreamPublisher {
        sender: tx,
        expected_index: Index::start_index(),
    };

    (publisher, CommitStream { receiver: rx })
}

#[derive(Debug, PartialEq)]
pub(crate) enum PublishOutcome {
    Published,
    // Nobody is listening anymore. The replica is shutting down.
    Disconnected,
    OutOfOrder { expected: Index },
}

impl CommitStreamPublisher {
    pub(crate) fn notify_commit(&mut self, logger: &slog::Logger, term: Term, index: Index, data: Bytes) -> PublishOutcome {
        if index != self.expected_index {
            slog::crit!(
                logger,
                "Refusing to publish committed entry {:?}, expected {:?}",
                index,
                self.expected_index
            );
            return PublishOutcome::OutOfOrder {
                expected: self.expected_index,
            };
        }
        self.expected_index = index.plus(1);

        if self.sender.send(CommittedEntry { term, index, data }).is_err() {
            slog::debug!(logger, "CommitStream has disconnected.");
            return PublishOutcome::Disconnected;
        }

        PublishOutcome::Published
    }
}

impl CommitStream {
    pub(crate) async fn recv(&mut self) -> Option<CommittedEntry> {
        self.receiver.recv().await
    }
}

use crate::api::ApplyMsg;
use crate::replica::write_ahead_log::CommitStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// ApplyPipeline forwards committed entries, in order, from the replica to the application's
/// apply channel. It runs on its own task so a slow application never stalls the event loop.
pub(crate) struct ApplyPipeline {
    logger: slog::Logger,
    commit_stream: CommitStream,
    apply_channel: mpsc::Sender<ApplyMsg>,
    kill_switch: CancellationToken,
}

impl ApplyPipeline {
    pub(crate) fn new(
        logger: slog::Logger,
        commit_stream: CommitStream,
        apply_channel: mpsc::Sender<ApplyMsg>,
        kill_switch: CancellationToken,
    ) -> Self {
        ApplyPipeline {
            logger,
            commit_stream,
            apply_channel,
            kill_switch,
        }
    }

    /// Exits when the node is killed, when the replica's event loop exits, or when the
    /// application drops its receiver.
    pub(crate) async fn run(mut self) {
        loop {
            let committed_entry = tokio::select! {
                _ = self.kill_switch.cancelled() => break,
                entry = self.commit_stream.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            let apply_msg = ApplyMsg {
                index: committed_entry.index.as_u64(),
                term: committed_entry.term.as_u64(),
                command: committed_entry.data,
            };
            slog::trace!(self.logger, "Applying {:?}", apply_msg.index);

            let sent = tokio::select! {
                _ = self.kill_switch.cancelled() => break,
                sent = self.apply_channel.send(apply_msg) => sent,
            };
            if sent.is_err() {
                slog::warn!(self.logger, "Apply channel receiver dropped. Stopping apply pipeline.");
                break;
            }
        }

        slog::info!(self.logger, "Apply pipeline has exited.");
    }
}

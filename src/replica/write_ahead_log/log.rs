use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::write_ahead_log::commit_stream::{CommitStreamPublisher, PublishOutcome};
use crate::replica::WriteAheadLogEntry;
use std::io;

/// WriteAheadLog is the raft-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to stable storage, not yet replicated to majority
/// 2. Committed - written to stable storage, replicated to majority
/// 3. Applied - a committed entry that has also been handed to the apply pipeline
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
pub(crate) struct WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    // Application's info/debug log.
    logger: slog::Logger,

    // This is the log that we're replicating.
    log: L,
    // Metadata about the highest log entry that we've locally written. It must be updated atomically.
    latest_entry_metadata: Option<(Term, Index)>,

    // Consumed by the apply pipeline, which delivers committed entries to the application.
    commit_stream: CommitStreamPublisher,
    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
    // Index of highest log entry handed to the apply pipeline. None if nothing is applied.
    last_applied_index: Option<Index>,
}

impl<L> WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    /// `log` may already hold entries restored from stable storage. Commit and applied indexes
    /// always start from nothing; they are rediscovered from the leader.
    pub(crate) fn new(logger: slog::Logger, log: L, commit_stream: CommitStreamPublisher) -> Result<Self, io::Error> {
        let latest_entry_metadata = match log.next_index().checked_minus(1) {
            None => None,
            Some(latest_index) => match log.read(latest_index)? {
                Some(entry) => Some((entry.term, latest_index)),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Log reports entry {:?} but it can't be read", latest_index),
                    ))
                }
            },
        };

        Ok(WriteAheadLog {
            logger,
            log,
            latest_entry_metadata,
            commit_stream,
            commit_index: None,
            last_applied_index: None,
        })
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, Index)> {
        self.latest_entry_metadata
    }

    pub(crate) fn latest_index(&self) -> Option<Index> {
        self.latest_entry_metadata.map(|(_, index)| index)
    }

    pub(crate) fn next_index(&self) -> Index {
        self.log.next_index()
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<WriteAheadLogEntry>, io::Error> {
        self.log.read(index)
    }

    pub(crate) fn read_range(&self, start: Index, max_entries: usize) -> Result<Vec<WriteAheadLogEntry>, io::Error> {
        self.log.read_range(start, max_entries)
    }

    pub(crate) fn all_entries(&self) -> Result<Vec<WriteAheadLogEntry>, io::Error> {
        self.log.read_range(Index::start_index(), usize::MAX)
    }

    fn read_required(&self, index: Index) -> Result<WriteAheadLogEntry, io::Error> {
        match self.read(index) {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => panic!("read_required() found no log entry for index {:?}", index),
            Err(ioe) => Err(ioe),
        }
    }

    /// First index of the run of `term` entries that ends at `index`. Used to tell the leader how
    /// far back it can skip when our log conflicts with its own.
    pub(crate) fn first_index_of_term_ending_at(&self, term: Term, index: Index) -> Result<Index, io::Error> {
        let mut first = index;
        while let Some(previous) = first.checked_minus(1) {
            match self.read(previous)? {
                Some(entry) if entry.term == term => first = previous,
                _ => break,
            }
        }

        Ok(first)
    }

    /// Remove anything starting at `index` and later.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        // Committed entries are durable cluster-wide. Removing one means someone lied to us.
        if let Some(commit_index) = self.commit_index {
            assert!(
                index > commit_index,
                "Attempted to truncate committed entry. Truncate={:?}, CommitIndex={:?}",
                index,
                commit_index
            );
        }

        let mut new_latest_entry_metadata = None;
        if let Some(new_latest_entry_index) = index.checked_minus(1) {
            new_latest_entry_metadata = self
                .read(new_latest_entry_index)?
                .map(|latest_entry| (latest_entry.term, new_latest_entry_index));
        }

        // Only update log after we've successfully read what new state will be.
        self.log.truncate(index);

        self.latest_entry_metadata = new_latest_entry_metadata;
        Ok(())
    }

    pub(crate) fn append(&mut self, entry: WriteAheadLogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term;
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.latest_entry_metadata = Some((appended_term, appended_index));

        Ok(appended_index)
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    #[cfg(test)]
    pub(crate) fn last_applied_index(&self) -> Option<Index> {
        self.last_applied_index
    }

    /// Leader path. Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        // A majority can lag behind what we already know is committed (e.g. a freshly elected
        // leader whose peers haven't confirmed anything yet). That's not a regression.
        if matches!(self.commit_index, Some(ci) if tentative_new_commit_index <= ci) {
            return Ok(false);
        }

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        //
        // Terms never decrease along the log, so if log[N] is from an older term, so is
        // everything before it. No need to search for a smaller N.
        let entry = self.read_required(tentative_new_commit_index)?;
        if entry.term != current_term {
            return Ok(false);
        }

        self.ratchet_fwd_commit_index_panicking(tentative_new_commit_index);

        Ok(true)
    }

    /// Follower path. Gracefully ignores stale (smaller or equal) values.
    pub(crate) fn ratchet_fwd_commit_index_if_greater(&mut self, new_commit_index: Index) -> bool {
        if matches!(self.commit_index, Some(ci) if new_commit_index <= ci) {
            return false;
        }

        self.ratchet_fwd_commit_index_panicking(new_commit_index);
        true
    }

    fn ratchet_fwd_commit_index_panicking(&mut self, new_commit_index: Index) {
        // Assert we only ratchet commit index forward.
        if let Some(current_commit_index) = self.commit_index {
            assert!(
                new_commit_index > current_commit_index,
                "Can't ratchet commit index backwards. Expected [input] {:?} > {:?} [current]",
                new_commit_index,
                current_commit_index,
            );
        }

        // Assert we only mark as committed if we have the entry locally.
        let latest_locally_written_index = self
            .latest_index()
            .expect("Can't ratchet commit index forward if we don't have any local logs");
        assert!(
            latest_locally_written_index >= new_commit_index,
            "Can't ratchet commit index forwards past our local log. Expected [latest log] {:?} >= {:?} [input]",
            latest_locally_written_index,
            new_commit_index,
        );

        self.commit_index.replace(new_commit_index);
    }

    /// apply_all_committed_entries hands all committed but unapplied entries, in order, to the
    /// apply pipeline.
    pub(crate) fn apply_all_committed_entries(&mut self) {
        if let Err(e) = self.try_apply_all_committed_entries() {
            // We've already persisted the log. Applying committed logs is not on critical
            // path. We can wait to retry next time.
            slog::error!(self.logger, "Failed to apply a log entry. {:?}", e);
        }
    }

    fn try_apply_all_committed_entries(&mut self) -> Result<(), io::Error> {
        let commit_index = match self.commit_index {
            Some(ci) => ci,
            None => return Ok(()),
        };

        loop {
            let next_index = match self.last_applied_index {
                None => Index::start_index(),
                Some(applied) if applied < commit_index => applied.plus(1),
                Some(_) => return Ok(()),
            };

            let entry = self.read_required(next_index)?;
            match self
                .commit_stream
                .notify_commit(&self.logger, entry.term, next_index, entry.data)
            {
                PublishOutcome::Published | PublishOutcome::Disconnected => {}
                PublishOutcome::OutOfOrder { .. } => return Ok(()),
            }
            self.last_applied_index.replace(next_index);
        }
    }
}

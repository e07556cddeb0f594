//! The raft-specific log. Wraps the generic commit log with term metadata, the commit index
//! and the hand-off of committed entries to the apply pipeline.

mod commit_stream;
mod log;
mod log_entry;

pub(crate) use commit_stream::new as commit_stream;
pub(crate) use commit_stream::CommitStream;
pub(crate) use log::WriteAheadLog;
pub(crate) use log_entry::WriteAheadLogEntry;

use bytes::Bytes;

/// One committed entry, handed to the application in log order. Every replica delivers the same
/// `command` at the same `index`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApplyMsg {
    pub index: u64,
    pub term: u64,
    pub command: Bytes,
}

/// Where a started command will land in the log, if it's ever committed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EntryId {
    pub index: u64,
    pub term: u64,
}

use std::{fmt, io};

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
struct U64NonZero(u64);

impl U64NonZero {
    fn new(val: u64) -> Self {
        assert_ne!(val, 0);
        U64NonZero(val)
    }
}

/// Index is an index of an entry in the log; i.e. a log entry's index.
///
/// There is no index 0. Places that need to talk about "before the first entry" use
/// `Option<Index>`, and only the outer API surfaces translate that into the `0` convention.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(U64NonZero);

impl Index {
    pub fn new(index: u64) -> Self {
        Index(U64NonZero::new(index))
    }

    pub fn new_usize(index: usize) -> Self {
        Self::new(index as u64)
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    /// Interprets `0` as "no entry".
    pub fn from_u64_or_none(index: u64) -> Option<Self> {
        if index == 0 {
            None
        } else {
            Some(Self::new(index))
        }
    }

    /// Inverse of `from_u64_or_none()`.
    pub fn option_as_u64(index: Option<Index>) -> u64 {
        index.map(|i| i.as_u64()).unwrap_or(0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0 .0
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.as_u64() + delta)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        self.as_u64().checked_sub(delta).and_then(Self::from_u64_or_none)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 .0)
    }
}

/// Log is an append only log intended for use as a replicated commit log.
///
/// Log indexes entries starting from 1. There will be no entry existing at index 0. The first
/// entry is written at index 1.
pub trait Log<E: Entry> {
    /// append() appends a log entry to the log at the next log entry index, then returns
    /// the log entry index that was just used to append the entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// Read log entry at specified index.
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Read at most `max_entries` consecutive entries, starting at `start`. Returns an empty
    /// vec if `start` is past the end of the log.
    fn read_range(&self, start: Index, max_entries: usize) -> Result<Vec<E>, io::Error>;

    /// Deletes anything starting at `index` and later.
    fn truncate(&mut self, index: Index);

    /// next_index returns the next index that will be used to append an entry.
    fn next_index(&self) -> Index;
}

pub trait Entry: Clone {}

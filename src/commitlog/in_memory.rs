use crate::commitlog::{Entry, Index, Log};
use std::io;

// Durability of the raft log is handled by the replica persisting its whole state through
// `StableStorage`, so the log itself only has to live in memory.
pub struct InMemoryLog<E: Entry> {
    log: Vec<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Result<Self, io::Error> {
        Ok(InMemoryLog { log: vec![] })
    }

    fn vec_index(index: Index) -> usize {
        // Log API states that Index starts from 1.
        (index.as_u64() - 1) as usize
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        self.log.push(entry);

        Ok(Index::new_usize(self.log.len()))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        Ok(self.log.get(Self::vec_index(index)).cloned())
    }

    fn read_range(&self, start: Index, max_entries: usize) -> Result<Vec<E>, io::Error> {
        let begin = Self::vec_index(start);
        if begin >= self.log.len() {
            return Ok(Vec::new());
        }
        let end = self.log.len().min(begin.saturating_add(max_entries));

        Ok(self.log[begin..end].to_vec())
    }

    fn truncate(&mut self, index: Index) {
        self.log.truncate(Self::vec_index(index))
    }

    fn next_index(&self) -> Index {
        Index::new_usize(self.log.len() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Entry for &'static str {}

    fn log_of(entries: &[&'static str]) -> InMemoryLog<&'static str> {
        let mut log = InMemoryLog::create().unwrap();
        for e in entries {
            log.append(*e).unwrap();
        }
        log
    }

    #[test]
    fn append_and_read() {
        let mut log = InMemoryLog::create().unwrap();
        assert_eq!(Index::start_index(), log.next_index());
        assert_eq!(None, log.read(Index::new(1)).unwrap());

        assert_eq!(Index::new(1), log.append("a").unwrap());
        assert_eq!(Index::new(2), log.append("b").unwrap());

        assert_eq!(Some("a"), log.read(Index::new(1)).unwrap());
        assert_eq!(Some("b"), log.read(Index::new(2)).unwrap());
        assert_eq!(None, log.read(Index::new(3)).unwrap());
        assert_eq!(Index::new(3), log.next_index());
    }

    #[test]
    fn read_range_caps_and_bounds() {
        let log = log_of(&["a", "b", "c", "d"]);

        assert_eq!(vec!["b", "c"], log.read_range(Index::new(2), 2).unwrap());
        assert_eq!(vec!["c", "d"], log.read_range(Index::new(3), 100).unwrap());
        assert_eq!(vec!["a", "b", "c", "d"], log.read_range(Index::new(1), usize::MAX).unwrap());
        assert!(log.read_range(Index::new(5), 10).unwrap().is_empty());
        assert!(log.read_range(Index::new(9), 10).unwrap().is_empty());
    }

    #[test]
    fn truncate_removes_tail() {
        let mut log = log_of(&["a", "b", "c"]);

        log.truncate(Index::new(2));
        assert_eq!(Index::new(2), log.next_index());
        assert_eq!(None, log.read(Index::new(2)).unwrap());

        // Truncating past the end is a no-op.
        log.truncate(Index::new(10));
        assert_eq!(Index::new(2), log.next_index());

        assert_eq!(Index::new(2), log.append("x").unwrap());
        assert_eq!(Some("x"), log.read(Index::new(2)).unwrap());
    }
}

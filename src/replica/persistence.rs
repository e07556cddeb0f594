use crate::commitlog::Log;
use crate::replica::local_state::{LocalState, Term};
use crate::replica::peers::ReplicaId;
use crate::replica::write_ahead_log::{WriteAheadLog, WriteAheadLogEntry};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// StableStorage holds one opaque blob that must survive a crash. `save` must be atomic: after
/// a crash, `load` returns either the previous blob or the new one, never a mix.
pub trait StableStorage: Send + Sync + 'static {
    fn save(&self, state: Bytes) -> io::Result<()>;

    /// `None` if nothing was ever saved.
    fn load(&self) -> io::Result<Option<Bytes>>;
}

/// Storage that lives as long as any clone of the handle. Hold on to a clone to "restart" a
/// killed replica with the state it persisted.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<Mutex<Option<Bytes>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the last saved blob. Zero if nothing was saved.
    pub fn state_size(&self) -> usize {
        self.state
            .lock()
            .expect("InMemoryStorage mutex poisoned")
            .as_ref()
            .map_or(0, |state| state.len())
    }
}

impl StableStorage for InMemoryStorage {
    fn save(&self, state: Bytes) -> io::Result<()> {
        self.state
            .lock()
            .expect("InMemoryStorage mutex poisoned")
            .replace(state);
        Ok(())
    }

    fn load(&self) -> io::Result<Option<Bytes>> {
        Ok(self.state.lock().expect("InMemoryStorage mutex poisoned").clone())
    }
}

/// Storage backed by a single file. Each save writes a sibling temp file, syncs it, renames it over
/// the real file, then syncs the directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorage {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl StableStorage for FileStorage {
    fn save(&self, state: Bytes) -> io::Result<()> {
        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)?;
            io::Write::write_all(&mut file, &state)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        // The rename itself isn't durable until the directory entry is.
        fs::File::open(self.parent_dir())?.sync_all()
    }

    fn load(&self) -> io::Result<Option<Bytes>> {
        match fs::read(&self.path) {
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported persisted state version {0}")]
    UnsupportedVersion(u8),
    #[error("persisted state truncated while reading {0}")]
    Truncated(&'static str),
    #[error("{0} unexpected trailing bytes after persisted state")]
    TrailingBytes(usize),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PersistError {
    #[error("failed to save state to stable storage")]
    Save(#[source] io::Error),
    #[error("failed to read log while encoding state")]
    ReadLog(#[source] io::Error),
}

impl From<PersistError> for io::Error {
    fn from(e: PersistError) -> Self {
        match e {
            PersistError::Save(ioe) | PersistError::ReadLog(ioe) => ioe,
        }
    }
}

/// Everything raft requires to be durable.
///
/// ```text
/// | 0 | 1 ... 8 | 9 | 10 ... 17 | 18 ... 25 | 26 ...
/// +---+---------+---+----------+-----------+--------
/// |Ver|  Term   |HV |   Vote   |  Count    | Entries...
/// +---+---------+---+----------+-----------+--------
/// ```
///
/// * `Ver` - format version, currently 1
/// * `HV` - 1 if `Vote` is meaningful, else 0
/// * `Count` - number of log entries that follow, each encoded per `WriteAheadLogEntry`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PersistedState {
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<ReplicaId>,
    pub(crate) entries: Vec<WriteAheadLogEntry>,
}

const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 8 + 1 + 8 + 8;

impl PersistedState {
    pub(crate) fn empty() -> Self {
        PersistedState {
            current_term: Term::new(0),
            voted_for: None,
            entries: Vec::new(),
        }
    }

    pub(crate) fn encode(&self) -> Bytes {
        let entries_len: usize = self.entries.iter().map(|e| e.encoded_len()).sum();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + entries_len);

        buf.put_u8(FORMAT_VERSION);
        buf.put_u64(self.current_term.as_u64());
        match self.voted_for {
            Some(vote) => {
                buf.put_u8(1);
                buf.put_u64(vote.as_usize() as u64);
            }
            None => {
                buf.put_u8(0);
                buf.put_u64(0);
            }
        }
        buf.put_u64(self.entries.len() as u64);
        for entry in self.entries.iter() {
            entry.encode_into(&mut buf);
        }

        buf.freeze()
    }

    pub(crate) fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < 1 {
            return Err(DecodeError::Truncated("version"));
        }
        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        if buf.remaining() < HEADER_LEN - 1 {
            return Err(DecodeError::Truncated("header"));
        }
        let current_term = Term::new(buf.get_u64());
        let has_vote = buf.get_u8() != 0;
        let vote = buf.get_u64();
        let voted_for = if has_vote {
            Some(ReplicaId::new(vote as usize))
        } else {
            None
        };

        let entry_count = buf.get_u64();
        let mut entries = Vec::new();
        for _ in 0..entry_count {
            entries.push(WriteAheadLogEntry::decode_from(&mut buf)?);
        }

        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }

        Ok(PersistedState {
            current_term,
            voted_for,
            entries,
        })
    }
}

/// PersistentStateStore snapshots term, vote and log into stable storage.
pub(crate) struct PersistentStateStore {
    logger: slog::Logger,
    storage: Arc<dyn StableStorage>,
}

impl PersistentStateStore {
    pub(crate) fn new(logger: slog::Logger, storage: Arc<dyn StableStorage>) -> Self {
        PersistentStateStore { logger, storage }
    }

    /// Absent state means a brand new replica.
    pub(crate) fn restore(&self) -> Result<PersistedState, RestoreError> {
        match self.storage.load().map_err(RestoreError::Load)? {
            None => Ok(PersistedState::empty()),
            Some(bytes) => {
                let state = PersistedState::decode(bytes)?;
                slog::info!(
                    self.logger,
                    "Restored persisted state. Term={:?}, VotedFor={:?}, LogLength={}",
                    state.current_term,
                    state.voted_for,
                    state.entries.len()
                );
                Ok(state)
            }
        }
    }

    pub(crate) fn persist<L>(
        &self,
        local_state: &LocalState,
        log: &WriteAheadLog<L>,
    ) -> Result<(), PersistError>
    where
        L: Log<WriteAheadLogEntry>,
    {
        let (current_term, voted_for) = local_state.voted_for_current_term();
        let entries = log.all_entries().map_err(PersistError::ReadLog)?;
        let state = PersistedState {
            current_term,
            voted_for,
            entries,
        };

        let encoded = state.encode();
        slog::trace!(self.logger, "Persisting {} bytes", encoded.len());
        self.storage.save(encoded).map_err(PersistError::Save)
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum RestoreError {
    #[error("failed to load state from stable storage")]
    Load(#[source] io::Error),
    #[error("persisted state is corrupt")]
    Corrupt(#[from] DecodeError),
}

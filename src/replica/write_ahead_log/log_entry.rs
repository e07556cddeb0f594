use crate::commitlog;
use crate::replica::persistence::DecodeError;
use crate::replica::Term;
use bytes::{Buf, BufMut, Bytes};

/// Byte representation, as embedded in the persisted replica state:
///
/// ```text
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 10| 11| 12| ... |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+-...-+
/// |        Term (8 bytes)         |  Len (4 bytes)|Data ... |
/// +-------------------------------+---------------+-----...-+
/// ```
///
/// * `Term` - raft leadership term when this entry was created
/// * `Len` - size of `Data`
/// * `Data` - opaque command supplied by the application
///
/// Versioning is done once for the whole persisted state, not per entry.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WriteAheadLogEntry {
    pub term: Term,
    pub data: Bytes,
}

const ENTRY_HEADER_LEN: usize = 8 + 4;

impl commitlog::Entry for WriteAheadLogEntry {}

impl WriteAheadLogEntry {
    pub(crate) fn encoded_len(&self) -> usize {
        ENTRY_HEADER_LEN + self.data.len()
    }

    pub(crate) fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.term.as_u64());
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    pub(crate) fn decode_from(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < ENTRY_HEADER_LEN {
            return Err(DecodeError::Truncated("log entry header"));
        }
        let term = Term::new(buf.get_u64());
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(DecodeError::Truncated("log entry data"));
        }
        let data = buf.split_to(len);

        Ok(WriteAheadLogEntry { term, data })
    }
}

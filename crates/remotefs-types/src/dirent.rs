//! Directory entries and the fixed-size `getdents` record.
//!
//! Record layout, little-endian, 280 bytes:
//!
//! | offset | size | field      |
//! |--------|------|------------|
//! | 0      | 8    | `d_ino`    |
//! | 8      | 8    | `d_off`    |
//! | 16     | 2    | `d_reclen` |
//! | 18     | 1    | `d_type`   |
//! | 19     | 256  | `d_name`   |
//! | 275    | 5    | padding    |

use serde::{Deserialize, Serialize};

use crate::attr::FileType;
use crate::error::{FsError, FsResult};
use crate::ids::InodeId;

/// Longest entry name, in bytes, excluding the terminating NUL.
pub const NAME_MAX: usize = 255;

/// Serialized size of one [`DirentRecord`].
pub const DIRENT_RECORD_SIZE: usize = 280;

const NAME_OFFSET: usize = 19;
const NAME_FIELD: usize = NAME_MAX + 1;

/// `d_type` values.
pub const DT_DIR: u8 = 4;
pub const DT_REG: u8 = 8;
pub const DT_LNK: u8 = 10;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Object the name refers to.
    pub ino: InodeId,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, ino: InodeId, kind: FileType) -> Self {
        Self {
            name: name.into(),
            ino,
            kind,
        }
    }

    /// The `getdents` record for this entry. `next` is the cursor token
    /// that positions just past it.
    pub fn to_record(&self, next: u64) -> FsResult<DirentRecord> {
        if self.name.len() > NAME_MAX {
            return Err(FsError::invalid(format!("name too long: {}", self.name)));
        }
        Ok(DirentRecord {
            ino: self.ino.get(),
            off: next,
            kind: self.kind.dirent_type(),
            name: self.name.clone(),
        })
    }
}

/// Decoded `getdents` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirentRecord {
    pub ino: u64,
    /// Token positioning the cursor after this entry.
    pub off: u64,
    pub kind: u8,
    pub name: String,
}

impl DirentRecord {
    /// Serialize into the first [`DIRENT_RECORD_SIZE`] bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> FsResult<()> {
        if buf.len() < DIRENT_RECORD_SIZE {
            return Err(FsError::out_of_range("dirent buffer smaller than one record"));
        }
        let name = self.name.as_bytes();
        if name.len() > NAME_MAX {
            return Err(FsError::invalid(format!("name too long: {}", self.name)));
        }

        let rec = &mut buf[..DIRENT_RECORD_SIZE];
        rec.fill(0);
        rec[0..8].copy_from_slice(&self.ino.to_le_bytes());
        rec[8..16].copy_from_slice(&self.off.to_le_bytes());
        rec[16..18].copy_from_slice(&(DIRENT_RECORD_SIZE as u16).to_le_bytes());
        rec[18] = self.kind;
        rec[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);
        Ok(())
    }

    /// Parse one record from the front of `buf`.
    pub fn decode(buf: &[u8]) -> FsResult<Self> {
        if buf.len() < DIRENT_RECORD_SIZE {
            return Err(FsError::invalid("truncated dirent record"));
        }
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let reclen = u16::from_le_bytes([buf[16], buf[17]]);
        if reclen as usize != DIRENT_RECORD_SIZE {
            return Err(FsError::invalid(format!("bad d_reclen {reclen}")));
        }

        let field = &buf[NAME_OFFSET..NAME_OFFSET + NAME_FIELD];
        let len = field
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| FsError::invalid("unterminated d_name"))?;
        let name = std::str::from_utf8(&field[..len])
            .map_err(|_| FsError::invalid("d_name is not UTF-8"))?
            .to_string();

        Ok(Self {
            ino: u64_at(0),
            off: u64_at(8),
            kind: buf[18],
            name,
        })
    }

    /// Parse every whole record in `buf`.
    pub fn decode_all(buf: &[u8]) -> FsResult<Vec<Self>> {
        buf.chunks(DIRENT_RECORD_SIZE).map(Self::decode).collect()
    }
}

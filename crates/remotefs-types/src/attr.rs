//! Attribute records.
//!
//! [`FileAttr`] is what the remote namespace reports for an object.
//! [`Stat`] is the caller-facing stat record with POSIX mode bits and
//! millisecond timestamps.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::flags::SetAttrMask;
use crate::ids::InodeId;

/// File type bits of `st_mode`.
pub const S_IFMT: u32 = 0o170000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;

/// Unit of `st_blocks`.
pub const STAT_BLOCK_SIZE: u64 = 512;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    /// The `S_IF*` bits for this type.
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileType::File => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
        }
    }

    /// The `DT_*` value used in directory entry records.
    pub fn dirent_type(&self) -> u8 {
        match self {
            FileType::File => 8,
            FileType::Directory => 4,
            FileType::Symlink => 10,
        }
    }

    /// Inverse of [`FileType::mode_bits`].
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(FileType::File),
            S_IFDIR => Some(FileType::Directory),
            S_IFLNK => Some(FileType::Symlink),
            _ => None,
        }
    }
}

/// Caller identity used for ownership and permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Object attributes as reported by the remote namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Object id.
    pub ino: InodeId,
    /// File type.
    pub kind: FileType,
    /// Permission bits (e.g., 0o644).
    pub perm: u32,
    /// Size in bytes.
    pub size: u64,
    /// Number of hard links.
    pub nlink: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
}

impl FileAttr {
    /// Attributes for a freshly created object.
    pub fn new(ino: InodeId, kind: FileType, perm: u32, owner: Credentials) -> Self {
        let now = SystemTime::now();
        Self {
            ino,
            kind,
            perm: perm & 0o7777,
            size: 0,
            nlink: if kind.is_dir() { 2 } else { 1 },
            uid: owner.uid,
            gid: owner.gid,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Full `st_mode`: type bits plus permission bits.
    pub fn mode(&self) -> u32 {
        self.kind.mode_bits() | (self.perm & 0o7777)
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }

    /// Build the caller-facing record. `blksize` comes from the file layout.
    pub fn to_stat(&self, blksize: u64) -> Stat {
        Stat {
            ino: self.ino.get(),
            mode: self.mode(),
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            size: self.size,
            blksize,
            blocks: self.size.div_ceil(STAT_BLOCK_SIZE),
            a_time: system_time_to_millis(self.atime),
            m_time: system_time_to_millis(self.mtime),
        }
    }
}

/// Caller-facing stat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stat {
    pub ino: u64,
    /// Type and permission bits.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Preferred I/O size.
    pub blksize: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Access time, milliseconds since the epoch.
    pub a_time: i64,
    /// Modification time, milliseconds since the epoch.
    pub m_time: i64,
}

impl Stat {
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }
}

bitflags! {
    /// Which [`Stat`] fields a readdirplus result actually populated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StatMask: u32 {
        const MODE = 1 << 0;
        const NLINK = 1 << 1;
        const UID = 1 << 2;
        const GID = 1 << 3;
        const ATIME = 1 << 4;
        const MTIME = 1 << 5;
        const INO = 1 << 6;
        const SIZE = 1 << 7;
        const BLOCKS = 1 << 8;
    }
}

impl StatMask {
    /// Fields that only the type and inode number are needed for.
    pub fn basic() -> Self {
        StatMask::MODE | StatMask::INO
    }
}

/// Attributes to set (for setattr operation).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetAttr {
    /// New size (truncate/extend).
    pub size: Option<u64>,
    /// New modification time.
    pub mtime: Option<SystemTime>,
    /// New access time.
    pub atime: Option<SystemTime>,
    /// New permissions.
    pub perm: Option<u32>,
    /// New user ID.
    pub uid: Option<u32>,
    /// New group ID.
    pub gid: Option<u32>,
}

impl SetAttr {
    /// Create a new empty SetAttr.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the modification time.
    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Set the access time.
    pub fn with_atime(mut self, atime: SystemTime) -> Self {
        self.atime = Some(atime);
        self
    }

    /// Set permissions.
    pub fn with_perm(mut self, perm: u32) -> Self {
        self.perm = Some(perm);
        self
    }

    /// Set ownership.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Select fields of `stat` by `mask`, the way a raw setattr call does.
    pub fn from_stat(stat: &Stat, mask: SetAttrMask) -> Self {
        let mut attr = SetAttr::new();
        if mask.contains(SetAttrMask::MODE) {
            attr.perm = Some(stat.mode & 0o7777);
        }
        if mask.contains(SetAttrMask::UID) {
            attr.uid = Some(stat.uid);
        }
        if mask.contains(SetAttrMask::GID) {
            attr.gid = Some(stat.gid);
        }
        if mask.contains(SetAttrMask::MTIME) {
            attr.mtime = Some(millis_to_system_time(stat.m_time));
        }
        if mask.contains(SetAttrMask::ATIME) {
            attr.atime = Some(millis_to_system_time(stat.a_time));
        }
        attr
    }

    /// Returns true if nothing would change.
    pub fn is_empty(&self) -> bool {
        *self == SetAttr::default()
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFs {
    /// Block size.
    pub bsize: u64,
    /// Fragment size.
    pub frsize: u64,
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Available blocks (to non-root).
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Filesystem id.
    pub fsid: u64,
    /// Maximum name length.
    pub namemax: u64,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            bsize: 4096,
            frsize: 4096,
            blocks: 1024 * 1024,
            bfree: 512 * 1024,
            bavail: 512 * 1024,
            files: 1024 * 1024,
            ffree: 512 * 1024,
            fsid: 0,
            namemax: 255,
        }
    }
}

/// Milliseconds since the epoch; negative before it.
pub fn system_time_to_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Inverse of [`system_time_to_millis`].
pub fn millis_to_system_time(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(ms.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
        assert_eq!(FileType::from_mode(0o100644), Some(FileType::File));
        assert_eq!(FileType::from_mode(0o010644), None);
    }

    #[test]
    fn test_stat_from_attr() {
        let mut attr = FileAttr::new(InodeId(7), FileType::File, 0o600, Credentials::new(1, 2));
        attr.size = 1025;
        let st = attr.to_stat(4 << 20);
        assert_eq!(st.mode, 0o100600);
        assert!(st.is_file());
        assert!(!st.is_dir());
        assert_eq!(st.blocks, 3);
        assert_eq!(st.blksize, 4 << 20);
        assert_eq!((st.uid, st.gid), (1, 2));
        assert_eq!(st.ino, 7);
    }

    #[test]
    fn test_new_dir_link_count() {
        let dir = FileAttr::new(InodeId(1), FileType::Directory, 0o40755, Credentials::default());
        assert_eq!(dir.nlink, 2);
        assert_eq!(dir.perm, 0o755);
        assert_eq!(dir.mode(), 0o040755);
    }

    #[test]
    fn test_setattr_from_stat_mask() {
        let st = Stat {
            mode: 0o100640,
            uid: 10,
            gid: 20,
            m_time: 1_000,
            ..Default::default()
        };
        let attr = SetAttr::from_stat(&st, SetAttrMask::MODE | SetAttrMask::MTIME);
        assert_eq!(attr.perm, Some(0o640));
        assert_eq!(attr.uid, None);
        assert_eq!(attr.mtime, Some(millis_to_system_time(1_000)));
        assert!(SetAttr::from_stat(&st, SetAttrMask::empty()).is_empty());
    }

    #[test]
    fn test_millis_round_trip_before_epoch() {
        let t = millis_to_system_time(-1500);
        assert_eq!(system_time_to_millis(t), -1500);
    }
}

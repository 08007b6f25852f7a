//! Flag sets and small enums passed across the client surface.
//!
//! Raw integer forms are what bindings hand us. Each `from_raw` rejects bits
//! or values outside the defined set with `InvalidArgument`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

bitflags! {
    /// Flags for opening files.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        const RDONLY = 1;
        const RDWR = 2;
        const APPEND = 4;
        const CREAT = 8;
        const TRUNC = 16;
        const EXCL = 32;
        const WRONLY = 64;
    }
}

/// Which direction(s) a handle may transfer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

impl OpenFlags {
    /// Parse raw flag bits, rejecting anything undefined.
    pub fn from_raw(raw: u32) -> FsResult<Self> {
        OpenFlags::from_bits(raw)
            .ok_or_else(|| FsError::invalid(format!("unknown open flags {raw:#x}")))
    }

    /// Resolve the access mode. No access bit means read-only.
    pub fn access_mode(self) -> FsResult<AccessMode> {
        let rdwr = self.contains(OpenFlags::RDWR);
        let wronly = self.contains(OpenFlags::WRONLY);
        match (rdwr, wronly) {
            (true, true) => Err(FsError::invalid("RDWR and WRONLY are mutually exclusive")),
            (true, false) => Ok(AccessMode::ReadWrite),
            (false, true) => Ok(AccessMode::Write),
            (false, false) => Ok(AccessMode::Read),
        }
    }

    pub fn is_create(self) -> bool {
        self.contains(OpenFlags::CREAT)
    }

    pub fn is_exclusive(self) -> bool {
        self.contains(OpenFlags::EXCL)
    }

    pub fn is_truncate(self) -> bool {
        self.contains(OpenFlags::TRUNC)
    }

    pub fn is_append(self) -> bool {
        self.contains(OpenFlags::APPEND)
    }
}

bitflags! {
    /// Fields selected by a raw setattr call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SetAttrMask: u32 {
        const MODE = 1;
        const UID = 2;
        const GID = 4;
        const MTIME = 8;
        const ATIME = 16;
    }
}

impl SetAttrMask {
    pub fn from_raw(raw: u32) -> FsResult<Self> {
        SetAttrMask::from_bits(raw)
            .ok_or_else(|| FsError::invalid(format!("unknown setattr mask {raw:#x}")))
    }
}

/// Existence condition for setting an extended attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum XattrMode {
    /// Create or replace.
    #[default]
    Any,
    /// Fail with `AlreadyExists` if present.
    CreateOnly,
    /// Fail with `NoData` if absent.
    ReplaceOnly,
}

impl XattrMode {
    /// 0 = any, 1 = create-only, 2 = replace-only.
    pub fn from_raw(raw: u32) -> FsResult<Self> {
        match raw {
            0 => Ok(XattrMode::Any),
            1 => Ok(XattrMode::CreateOnly),
            2 => Ok(XattrMode::ReplaceOnly),
            _ => Err(FsError::invalid(format!("unknown xattr flags {raw:#x}"))),
        }
    }
}

/// Reference point for `lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl Whence {
    /// 0 = SET, 1 = CUR, 2 = END.
    pub fn from_raw(raw: i32) -> FsResult<Self> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(FsError::invalid(format!("unknown whence {raw}"))),
        }
    }
}

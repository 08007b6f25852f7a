//! Typed identifiers.
//!
//! Inode ids name objects in the remote namespace. Descriptor and cursor ids
//! are handed out by one mount context and mean nothing to any other.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote object identifier (inode-like).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InodeId(pub u64);

/// Open file descriptor.
///
/// Any raw value can be wrapped; unknown values fail with `BadDescriptor`
/// at use rather than at construction.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fd(i32);

/// Open directory cursor.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirId(u32);

impl InodeId {
    /// The raw number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Fd {
    /// Wrap a raw descriptor number.
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw descriptor number.
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl DirId {
    /// Wrap a raw cursor number.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw cursor number.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InodeId({:#x})", self.0)
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fd({})", self.0)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirId({})", self.0)
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

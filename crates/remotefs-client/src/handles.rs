//! Open file descriptors.
//!
//! Each descriptor records the inode, the access mode granted at open time,
//! and its own cursor. Permission is never re-checked after open, so a
//! later chmod does not affect descriptors already handed out.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use remotefs_types::{AccessMode, Fd, FsError, FsResult, InodeId};

/// State behind one descriptor.
#[derive(Debug)]
pub struct OpenFile {
    ino: InodeId,
    access: AccessMode,
    append: bool,
    offset: AtomicU64,
    path: String,
}

impl OpenFile {
    pub fn new(ino: InodeId, access: AccessMode, append: bool, path: impl Into<String>) -> Self {
        Self {
            ino,
            access,
            append,
            offset: AtomicU64::new(0),
            path: path.into(),
        }
    }

    pub fn ino(&self) -> InodeId {
        self.ino
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn is_append(&self) -> bool {
        self.append
    }

    /// Path the file was opened by.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Release);
    }

    /// Fail `BadDescriptor` unless the handle was opened for reading.
    pub fn check_readable(&self, fd: Fd) -> FsResult<()> {
        if !self.access.can_read() {
            return Err(FsError::bad_descriptor(format!("fd {fd} not open for reading")));
        }
        Ok(())
    }

    /// Fail `BadDescriptor` unless the handle was opened for writing.
    pub fn check_writable(&self, fd: Fd) -> FsResult<()> {
        if !self.access.can_write() {
            return Err(FsError::bad_descriptor(format!("fd {fd} not open for writing")));
        }
        Ok(())
    }
}

/// Descriptor table for one mount.
///
/// Ids start at 1 and are never reused while the table lives.
#[derive(Debug)]
pub struct FileTable {
    files: DashMap<i32, Arc<OpenFile>>,
    next: AtomicI32,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first: i32) -> Self {
        Self {
            files: DashMap::new(),
            next: AtomicI32::new(first),
        }
    }

    /// Register an open file, returning its new descriptor.
    pub fn insert(&self, file: OpenFile) -> FsResult<Fd> {
        let raw = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map_err(|_| FsError::OutOfMemory("descriptor ids exhausted".to_string()))?;
        self.files.insert(raw, Arc::new(file));
        Ok(Fd::from_raw(raw))
    }

    pub fn get(&self, fd: Fd) -> FsResult<Arc<OpenFile>> {
        self.files
            .get(&fd.as_raw())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FsError::bad_descriptor(format!("fd {fd}")))
    }

    pub fn remove(&self, fd: Fd) -> FsResult<Arc<OpenFile>> {
        self.files
            .remove(&fd.as_raw())
            .map(|(_, file)| file)
            .ok_or_else(|| FsError::bad_descriptor(format!("fd {fd}")))
    }

    /// Drop every descriptor, returning how many were open.
    pub fn clear(&self) -> usize {
        let count = self.files.len();
        self.files.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

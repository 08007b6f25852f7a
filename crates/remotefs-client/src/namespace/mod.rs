//! Remote namespace adapter.
//!
//! The client never touches storage directly. Every lookup, read, write and
//! attribute change goes through [`RemoteNamespace`], one request and one
//! response at a time. Operations are keyed by inode id so the client owns
//! all path handling (symlinks, `..`, cwd) itself.

mod memory;

pub use memory::MemoryNamespace;

use remotefs_types::{
    Credentials, DirEntry, FileAttr, FileLayout, FsResult, InodeId, SetAttr, StatFs, XattrMode,
};

/// A child returned by [`RemoteNamespace::readdir`].
///
/// Adapters that can return attributes alongside names fill in `attr`;
/// the client falls back to what the entry itself says otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaddirEntry {
    pub entry: DirEntry,
    pub attr: Option<FileAttr>,
}

/// Primitive operations against the remote store.
///
/// All methods block until the store answers. Errors are returned
/// verbatim to the caller unless the client detects something more
/// specific first.
pub trait RemoteNamespace: Send + Sync {
    // ========================================================================
    // Lookup
    // ========================================================================

    /// The namespace root directory.
    fn root(&self) -> InodeId;

    /// Find `name` in directory `dir`. Never follows symlinks.
    fn lookup(&self, dir: InodeId, name: &str) -> FsResult<FileAttr>;

    /// Attributes of an object.
    fn getattr(&self, ino: InodeId) -> FsResult<FileAttr>;

    /// List children of `dir` (never `.` or `..`).
    ///
    /// Entries come back in a stable order. `after` resumes strictly past
    /// that name; at most `max` entries are returned, and fewer than `max`
    /// means the listing is complete.
    fn readdir(&self, dir: InodeId, after: Option<&str>, max: usize)
    -> FsResult<Vec<ReaddirEntry>>;

    /// Target text of a symlink.
    fn readlink(&self, ino: InodeId) -> FsResult<String>;

    // ========================================================================
    // Namespace changes
    // ========================================================================

    /// Create a regular file with the given layout.
    fn create(
        &self,
        dir: InodeId,
        name: &str,
        perm: u32,
        owner: Credentials,
        layout: &FileLayout,
    ) -> FsResult<FileAttr>;

    /// Create a directory.
    fn mkdir(&self, dir: InodeId, name: &str, perm: u32, owner: Credentials)
    -> FsResult<FileAttr>;

    /// Create a symlink named `name` in `dir` pointing at `target`.
    fn symlink(&self, dir: InodeId, name: &str, target: &str, owner: Credentials)
    -> FsResult<FileAttr>;

    /// Add another name for `ino`.
    fn link(&self, ino: InodeId, dir: InodeId, name: &str) -> FsResult<FileAttr>;

    /// Remove a non-directory name.
    fn unlink(&self, dir: InodeId, name: &str) -> FsResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, dir: InodeId, name: &str) -> FsResult<()>;

    /// Move `from_dir/from_name` to `to_dir/to_name`, replacing a compatible target.
    fn rename(&self, from_dir: InodeId, from_name: &str, to_dir: InodeId, to_name: &str)
    -> FsResult<()>;

    // ========================================================================
    // Data and attributes
    // ========================================================================

    /// Read up to `len` bytes at `offset`. Short at end of file.
    fn read(&self, ino: InodeId, offset: u64, len: usize) -> FsResult<Vec<u8>>;

    /// Write `data` at `offset`, zero-filling any gap. Returns bytes written.
    fn write(&self, ino: InodeId, offset: u64, data: &[u8]) -> FsResult<usize>;

    /// Resize a file.
    fn truncate(&self, ino: InodeId, size: u64) -> FsResult<()>;

    /// Change attributes.
    fn setattr(&self, ino: InodeId, set: &SetAttr) -> FsResult<FileAttr>;

    // ========================================================================
    // Extended attributes
    // ========================================================================

    /// Whole value of an attribute; `NoData` if absent.
    fn getxattr(&self, ino: InodeId, name: &str) -> FsResult<Vec<u8>>;

    fn setxattr(&self, ino: InodeId, name: &str, value: &[u8], mode: XattrMode) -> FsResult<()>;

    /// Attribute names, in the adapter's order.
    fn listxattr(&self, ino: InodeId) -> FsResult<Vec<String>>;

    /// Remove an attribute; `NoData` if absent.
    fn removexattr(&self, ino: InodeId, name: &str) -> FsResult<()>;

    // ========================================================================
    // Placement and metadata
    // ========================================================================

    /// Striping layout of a regular file.
    fn layout(&self, ino: InodeId) -> FsResult<FileLayout>;

    /// Replica count of a pool; `NotFound` for unknown pools.
    fn pool_replication(&self, pool: &str) -> FsResult<u32>;

    /// Filesystem statistics.
    fn statfs(&self) -> FsResult<StatFs>;

    /// Flush one object. Nothing to do for stores without write-back.
    fn fsync(&self, ino: InodeId, dataonly: bool) -> FsResult<()> {
        let _ = (ino, dataonly);
        Ok(())
    }

    /// Flush everything.
    fn sync_fs(&self) -> FsResult<()> {
        Ok(())
    }
}

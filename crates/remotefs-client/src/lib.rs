//! # remotefs-client
//!
//! A POSIX-like client over a remote namespace.
//!
//! A [`MountContext`] is configured, mounted at some directory of a
//! [`RemoteNamespace`], and then used like a filesystem: paths are resolved
//! relative to its working directory with symlinks followed under a loop
//! budget, files are opened into descriptors with their own cursors, and
//! directories are enumerated through seekable cursors that also emit
//! fixed-size `getdents` records. Extended attributes use the two-phase
//! probe/fill buffer protocol.
//!
//! ```no_run
//! use std::sync::Arc;
//! use remotefs_client::{MemoryNamespace, MountContext, OpenFlags};
//!
//! let ctx = MountContext::new(Arc::new(MemoryNamespace::new()));
//! ctx.mount(None)?;
//! let fd = ctx.open("/hello", OpenFlags::CREAT | OpenFlags::RDWR, 0o644)?;
//! ctx.write(fd, b"hi", -1)?;
//! ctx.close(fd)?;
//! ctx.unmount()?;
//! # Ok::<(), remotefs_client::FsError>(())
//! ```

pub mod config;
pub mod dir;
pub mod handles;
pub mod mount;
pub mod namespace;
pub mod negotiate;
pub mod resolver;
pub mod xattr;

pub use config::{ClientConfig, ConfigStore};
pub use mount::{MountContext, MountState};
pub use namespace::{MemoryNamespace, ReaddirEntry, RemoteNamespace};
pub use negotiate::MAX_NEGOTIATION_ROUNDS;

pub use remotefs_types::{
    AccessMode, Credentials, DIRENT_RECORD_SIZE, DirEntry, DirId, DirentRecord, Fd, FileAttr,
    FileLayout, FileType, FsError, FsErrorKind, FsResult, InodeId, NAME_MAX, OpenFlags, SetAttr,
    SetAttrMask, Stat, StatFs, StatMask, Whence, XattrMode,
};

//! Shared types for the remotefs client.
//!
//! Everything here is plain data: errors, attribute and stat records,
//! directory entries with their `getdents` wire form, flag sets, and
//! striping layouts. The semantic layer lives in `remotefs-client`.

pub mod attr;
pub mod dirent;
pub mod error;
pub mod flags;
pub mod ids;
pub mod layout;

pub use attr::{
    Credentials, FileAttr, FileType, SetAttr, Stat, StatFs, StatMask, millis_to_system_time,
    system_time_to_millis,
};
pub use dirent::{DIRENT_RECORD_SIZE, DirEntry, DirentRecord, NAME_MAX};
pub use error::{FsError, FsErrorKind, FsResult};
pub use flags::{AccessMode, OpenFlags, SetAttrMask, Whence, XattrMode};
pub use ids::{DirId, Fd, InodeId};
pub use layout::FileLayout;

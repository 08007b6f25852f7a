//! Client error taxonomy.
//!
//! Every operation returns either a value or exactly one [`FsError`]. The
//! payload-free [`FsErrorKind`] is what binding layers switch on, and
//! [`FsError::errno`] is the single mapping to POSIX error numbers.

use std::io;

use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Client error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// Path component or entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Entry already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A non-directory was required.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Symlink expansion budget exhausted.
    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(String),

    /// Mode bits deny the requested access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Descriptor or cursor is closed, unknown, or lacks the needed access.
    #[error("bad descriptor: {0}")]
    BadDescriptor(String),

    /// Malformed argument, unknown flag bits, unsupported layout.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Caller buffer too small. The only error callers are expected to retry.
    #[error("result out of range: {0}")]
    OutOfRange(String),

    /// Operation needs a mounted context.
    #[error("not mounted")]
    NotMounted,

    /// Context is mounted and the operation needs it not to be.
    #[error("already mounted")]
    AlreadyMounted,

    /// Extended attribute does not exist.
    #[error("no such attribute: {0}")]
    NoData(String),

    /// Allocation or id-space exhaustion.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Adapter failure with no more specific kind.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Payload-free error kind, with stable names for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum FsErrorKind {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    SymlinkLoop,
    PermissionDenied,
    BadDescriptor,
    InvalidArgument,
    OutOfRange,
    NotMounted,
    AlreadyMounted,
    NoData,
    OutOfMemory,
    Io,
}

impl FsErrorKind {
    /// POSIX errno number (Linux values).
    pub fn errno(self) -> i32 {
        match self {
            FsErrorKind::NotFound => 2,
            FsErrorKind::Io => 5,
            FsErrorKind::BadDescriptor => 9,
            FsErrorKind::OutOfMemory => 12,
            FsErrorKind::PermissionDenied => 13,
            FsErrorKind::AlreadyExists => 17,
            FsErrorKind::NotADirectory => 20,
            FsErrorKind::IsADirectory => 21,
            FsErrorKind::InvalidArgument => 22,
            FsErrorKind::OutOfRange => 34,
            FsErrorKind::DirectoryNotEmpty => 39,
            FsErrorKind::SymlinkLoop => 40,
            FsErrorKind::NoData => 61,
            FsErrorKind::AlreadyMounted => 106,
            FsErrorKind::NotMounted => 107,
        }
    }
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a SymlinkLoop error.
    pub fn symlink_loop(path: impl Into<String>) -> Self {
        Self::SymlinkLoop(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a BadDescriptor error.
    pub fn bad_descriptor(what: impl Into<String>) -> Self {
        Self::BadDescriptor(what.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an OutOfRange error.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create a NoData error.
    pub fn no_data(name: impl Into<String>) -> Self {
        Self::NoData(name.into())
    }

    /// Create an Io error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Self::OutOfMemory(msg.into())
    }

    /// The payload-free kind of this error.
    pub fn kind(&self) -> FsErrorKind {
        match self {
            FsError::NotFound(_) => FsErrorKind::NotFound,
            FsError::AlreadyExists(_) => FsErrorKind::AlreadyExists,
            FsError::NotADirectory(_) => FsErrorKind::NotADirectory,
            FsError::IsADirectory(_) => FsErrorKind::IsADirectory,
            FsError::DirectoryNotEmpty(_) => FsErrorKind::DirectoryNotEmpty,
            FsError::SymlinkLoop(_) => FsErrorKind::SymlinkLoop,
            FsError::PermissionDenied(_) => FsErrorKind::PermissionDenied,
            FsError::BadDescriptor(_) => FsErrorKind::BadDescriptor,
            FsError::InvalidArgument(_) => FsErrorKind::InvalidArgument,
            FsError::OutOfRange(_) => FsErrorKind::OutOfRange,
            FsError::NotMounted => FsErrorKind::NotMounted,
            FsError::AlreadyMounted => FsErrorKind::AlreadyMounted,
            FsError::NoData(_) => FsErrorKind::NoData,
            FsError::OutOfMemory(_) => FsErrorKind::OutOfMemory,
            FsError::Io(_) => FsErrorKind::Io,
        }
    }

    /// POSIX errno number for this error.
    pub fn errno(&self) -> i32 {
        self.kind().errno()
    }

    /// Buffer-too-small is the only condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() == FsErrorKind::OutOfRange
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let errno = e.errno();
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            FsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            FsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::NotMounted => io::Error::new(io::ErrorKind::NotConnected, "not mounted"),
            FsError::OutOfMemory(msg) => io::Error::new(io::ErrorKind::OutOfMemory, msg),
            FsError::Io(msg) => io::Error::other(msg),
            _ => io::Error::from_raw_os_error(errno),
        }
    }
}

/// Client result type.
pub type FsResult<T> = Result<T, FsError>;

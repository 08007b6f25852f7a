//! Extended attribute access for one object.
//!
//! Names are passed through exactly as given; callers include the namespace
//! prefix (`user.`, `trusted.`, ...). Listing applies the mount's
//! `client_xattr_filter`; get/set/remove do not.

use remotefs_types::{FsError, FsResult, InodeId, XattrMode};

use crate::config::ClientConfig;
use crate::namespace::RemoteNamespace;
use crate::negotiate::{fill, join_nul_list};

pub struct AttrStore<'a> {
    ns: &'a dyn RemoteNamespace,
    config: &'a ClientConfig,
}

impl<'a> AttrStore<'a> {
    pub fn new(ns: &'a dyn RemoteNamespace, config: &'a ClientConfig) -> Self {
        Self { ns, config }
    }

    /// Two-phase get: no buffer (or an empty one) returns the value length.
    pub fn get(&self, ino: InodeId, name: &str, buf: Option<&mut [u8]>) -> FsResult<usize> {
        check_name(name)?;
        let value = self.ns.getxattr(ino, name)?;
        fill(&value, buf)
    }

    pub fn set(&self, ino: InodeId, name: &str, value: &[u8], mode: XattrMode) -> FsResult<()> {
        check_name(name)?;
        self.ns.setxattr(ino, name, value, mode)
    }

    /// Visible names, each NUL-terminated.
    pub fn names(&self, ino: InodeId) -> FsResult<Vec<u8>> {
        let names = self.ns.listxattr(ino)?;
        Ok(join_nul_list(
            names
                .iter()
                .map(String::as_str)
                .filter(|name| self.config.xattr_visible(name)),
        ))
    }

    /// Two-phase list: no buffer (or an empty one) returns the list length.
    pub fn list(&self, ino: InodeId, buf: Option<&mut [u8]>) -> FsResult<usize> {
        fill(&self.names(ino)?, buf)
    }

    pub fn remove(&self, ino: InodeId, name: &str) -> FsResult<()> {
        check_name(name)?;
        self.ns.removexattr(ino, name)
    }
}

fn check_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(FsError::invalid(format!("bad attribute name {name:?}")));
    }
    Ok(())
}

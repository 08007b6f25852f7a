//! Mount context.
//!
//! One [`MountContext`] is one configured connection to a remote namespace.
//! It owns the configuration, the lifecycle state, the working directory,
//! and the descriptor and cursor tables. Every operation blocks until the
//! namespace answers.
//!
//! Lifecycle changes take the state lock for writing; every other
//! operation holds it for reading while it runs, so mount, unmount and
//! release never interleave with in-flight calls.

use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use strum::{Display, IntoStaticStr};

use remotefs_types::{
    DirEntry, DirId, Fd, FileAttr, FileLayout, FsError, FsResult, InodeId, OpenFlags, SetAttr,
    SetAttrMask, Stat, StatFs, StatMask, Whence, XattrMode,
};

use crate::config::{ClientConfig, ConfigStore};
use crate::dir::{CursorEntry, DirStream, DirTable};
use crate::handles::{FileTable, OpenFile};
use crate::namespace::RemoteNamespace;
use crate::negotiate::{negotiate, split_nul_list};
use crate::resolver::{
    FinalLink, Lookup, MAY_EXEC, MAY_READ, MAY_WRITE, PathChain, Resolved, Resolver, permits,
};
use crate::xattr::AttrStore;

/// `st_blksize` for anything without a layout.
const DEFAULT_BLKSIZE: u64 = 4096;

/// Where a context is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum MountState {
    /// Fresh, nothing set.
    Created,
    /// Options set, or unmounted.
    Configured,
    Mounted,
    /// Released; only dropping is left.
    Released,
}

struct Mounted {
    config: ClientConfig,
    cwd: Mutex<PathChain>,
    localize_reads: AtomicBool,
}

impl Mounted {
    fn resolver<'a>(&self, ns: &'a dyn RemoteNamespace) -> Resolver<'a> {
        Resolver::new(
            ns,
            self.config.credentials(),
            self.config.client_permissions,
            self.config.client_max_symlinks,
        )
    }

    fn cwd(&self) -> PathChain {
        self.cwd.lock().clone()
    }

    /// Fail `PermissionDenied` unless `want` is granted on `attr`.
    fn require(&self, attr: &FileAttr, want: u32, path: &str) -> FsResult<()> {
        if self.config.client_permissions && !permits(attr, self.config.credentials(), want) {
            return Err(FsError::permission_denied(path));
        }
        Ok(())
    }
}

enum Lifecycle {
    Created,
    Configured,
    Mounted(Box<Mounted>),
    Released,
}

impl Lifecycle {
    fn state(&self) -> MountState {
        match self {
            Lifecycle::Created => MountState::Created,
            Lifecycle::Configured => MountState::Configured,
            Lifecycle::Mounted(_) => MountState::Mounted,
            Lifecycle::Released => MountState::Released,
        }
    }
}

fn released() -> FsError {
    FsError::invalid("context released")
}

/// Decode the read/write offset argument: `-1` means the handle's cursor.
fn io_offset(offset: i64) -> FsResult<Option<u64>> {
    match offset {
        -1 => Ok(None),
        o if o < 0 => Err(FsError::invalid(format!("negative offset {o}"))),
        o => Ok(Some(o as u64)),
    }
}

/// A client's view of one remote namespace.
pub struct MountContext {
    id: Option<String>,
    ns: Arc<dyn RemoteNamespace>,
    conf: RwLock<ConfigStore>,
    state: RwLock<Lifecycle>,
    files: FileTable,
    dirs: DirTable,
}

impl std::fmt::Debug for MountContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountContext")
            .field("id", &self.id)
            .field("state", &self.state.read().state())
            .field("files", &self.files.len())
            .field("dirs", &self.dirs.len())
            .finish()
    }
}

impl MountContext {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// A new, unconfigured context over `ns`.
    pub fn new(ns: Arc<dyn RemoteNamespace>) -> Self {
        Self::with_id(ns, None)
    }

    /// Like [`new`](Self::new), with a client id for logs.
    pub fn with_id(ns: Arc<dyn RemoteNamespace>, id: Option<&str>) -> Self {
        Self {
            id: id.map(str::to_string),
            ns,
            conf: RwLock::new(ConfigStore::new()),
            state: RwLock::new(Lifecycle::Created),
            files: FileTable::new(),
            dirs: DirTable::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> MountState {
        self.state.read().state()
    }

    pub fn is_mounted(&self) -> bool {
        self.state() == MountState::Mounted
    }

    /// The namespace this context talks to.
    pub fn namespace(&self) -> &Arc<dyn RemoteNamespace> {
        &self.ns
    }

    /// Set an option. Allowed in any live state; options are read at mount.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.conf_set")]
    pub fn conf_set(&self, key: &str, value: &str) -> FsResult<()> {
        let mut state = self.state.write();
        if matches!(*state, Lifecycle::Released) {
            return Err(released());
        }
        self.conf.write().set(key, value)?;
        if matches!(*state, Lifecycle::Created) {
            *state = Lifecycle::Configured;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.conf_get")]
    pub fn conf_get(&self, key: &str) -> FsResult<String> {
        if matches!(*self.state.read(), Lifecycle::Released) {
            return Err(released());
        }
        self.conf.read().get(key)
    }

    /// Merge options from a TOML file; see [`ConfigStore::read_file`].
    #[tracing::instrument(level = "debug", skip(self), name = "fs.conf_read_file")]
    pub fn conf_read_file(&self, path: Option<&Path>) -> FsResult<()> {
        let mut state = self.state.write();
        if matches!(*state, Lifecycle::Released) {
            return Err(released());
        }
        self.conf.write().read_file(path)?;
        if matches!(*state, Lifecycle::Created) {
            *state = Lifecycle::Configured;
        }
        Ok(())
    }

    /// Mount at `root` (default `/`), which must resolve to a directory.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.mount")]
    pub fn mount(&self, root: Option<&str>) -> FsResult<()> {
        let mut state = self.state.write();
        match *state {
            Lifecycle::Mounted(_) => return Err(FsError::AlreadyMounted),
            Lifecycle::Released => return Err(released()),
            Lifecycle::Created | Lifecycle::Configured => {}
        }

        let config = self.conf.read().client_config()?;
        let path = root.unwrap_or("/");
        let top = PathChain::new(self.ns.root());
        let found = Resolver::new(
            &*self.ns,
            config.credentials(),
            config.client_permissions,
            config.client_max_symlinks,
        )
        .resolve(&top, path, FinalLink::Follow)?;
        if !found.attr.is_dir() {
            return Err(FsError::not_found(path));
        }

        let root_chain = PathChain::new(found.attr.ino);
        tracing::info!(
            id = self.id.as_deref().unwrap_or("-"),
            root = path,
            uid = config.client_mount_uid,
            gid = config.client_mount_gid,
            "mounted"
        );
        *state = Lifecycle::Mounted(Box::new(Mounted {
            localize_reads: AtomicBool::new(config.client_localize_reads),
            config,
            cwd: Mutex::new(root_chain),
        }));
        Ok(())
    }

    /// Unmount. Descriptors and cursors still open become invalid.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.unmount")]
    pub fn unmount(&self) -> FsResult<()> {
        let mut state = self.state.write();
        if !matches!(*state, Lifecycle::Mounted(_)) {
            return Err(FsError::NotMounted);
        }
        let files = self.files.clear();
        let dirs = self.dirs.clear();
        if files + dirs > 0 {
            tracing::warn!(files, dirs, "unmount invalidated open descriptors");
        }
        *state = Lifecycle::Configured;
        tracing::info!(id = self.id.as_deref().unwrap_or("-"), "unmounted");
        Ok(())
    }

    /// Release the context. Must be unmounted first.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.release")]
    pub fn release(&self) -> FsResult<()> {
        let mut state = self.state.write();
        match *state {
            Lifecycle::Mounted(_) => return Err(FsError::AlreadyMounted),
            Lifecycle::Released => return Err(released()),
            Lifecycle::Created | Lifecycle::Configured => {}
        }
        *self.conf.write() = ConfigStore::new();
        *state = Lifecycle::Released;
        tracing::info!(id = self.id.as_deref().unwrap_or("-"), "released");
        Ok(())
    }

    fn mounted<T>(&self, op: impl FnOnce(&Mounted) -> FsResult<T>) -> FsResult<T> {
        let state = self.state.read();
        match &*state {
            Lifecycle::Mounted(m) => op(&**m),
            _ => Err(FsError::NotMounted),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn stat_of(&self, attr: &FileAttr) -> FsResult<Stat> {
        let blksize = if attr.is_file() {
            self.ns.layout(attr.ino)?.blksize()
        } else {
            DEFAULT_BLKSIZE
        };
        Ok(attr.to_stat(blksize))
    }

    fn resolve(&self, m: &Mounted, path: &str, last: FinalLink) -> FsResult<Resolved> {
        m.resolver(&*self.ns).resolve(&m.cwd(), path, last)
    }

    /// Resolve the directory holding `path`'s last component and check that
    /// entries may be added or removed there.
    fn writable_parent(&self, m: &Mounted, path: &str) -> FsResult<(InodeId, String)> {
        let (parent, name) = m.resolver(&*self.ns).resolve_parent(&m.cwd(), path)?;
        let dir = self.ns.getattr(parent.current())?;
        m.require(&dir, MAY_WRITE | MAY_EXEC, path)?;
        Ok((parent.current(), name))
    }

    fn dir_stream(&self, m: &Mounted, path: &str, id: u32) -> FsResult<DirStream> {
        let found = self.resolve(m, path, FinalLink::Follow)?;
        if !found.attr.is_dir() {
            return Err(FsError::not_a_directory(path));
        }
        m.require(&found.attr, MAY_READ, path)?;
        let parent = self.ns.getattr(found.chain.parent())?;
        Ok(DirStream::new(
            id,
            &found.attr,
            &parent,
            m.config.readdir_batch(),
        ))
    }

    fn with_file<T>(&self, fd: Fd, op: impl FnOnce(&OpenFile) -> FsResult<T>) -> FsResult<T> {
        self.mounted(|_| {
            let file = self.files.get(fd)?;
            op(&file)
        })
    }

    fn with_cursor<T>(&self, dir: DirId, op: impl FnOnce(&mut DirStream) -> FsResult<T>) -> FsResult<T> {
        self.mounted(|_| {
            let cursor = self.dirs.get(dir)?;
            let mut stream = cursor.lock();
            op(&mut stream)
        })
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    /// Current directory, as an absolute path from the mount root.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.getcwd")]
    pub fn getcwd(&self) -> FsResult<String> {
        self.mounted(|m| Ok(m.cwd.lock().path()))
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.chdir")]
    pub fn chdir(&self, path: &str) -> FsResult<()> {
        self.mounted(|m| {
            let found = self.resolve(m, path, FinalLink::Follow)?;
            if !found.attr.is_dir() {
                return Err(FsError::not_a_directory(path));
            }
            m.require(&found.attr, MAY_EXEC, path)?;
            *m.cwd.lock() = found.chain;
            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.statfs")]
    pub fn statfs(&self, path: &str) -> FsResult<StatFs> {
        self.mounted(|m| {
            self.resolve(m, path, FinalLink::Follow)?;
            self.ns.statfs()
        })
    }

    /// Stat, following a final symlink.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.stat")]
    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        self.mounted(|m| self.stat_of(&self.resolve(m, path, FinalLink::Follow)?.attr))
    }

    /// Stat without following a final symlink.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.lstat")]
    pub fn lstat(&self, path: &str) -> FsResult<Stat> {
        self.mounted(|m| self.stat_of(&self.resolve(m, path, FinalLink::NoFollow)?.attr))
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.setattr")]
    pub fn setattr(&self, path: &str, set: &SetAttr) -> FsResult<Stat> {
        self.mounted(|m| {
            let found = self.resolve(m, path, FinalLink::Follow)?;
            if set.size.is_some() {
                m.require(&found.attr, MAY_WRITE, path)?;
            }
            let attr = self.ns.setattr(found.attr.ino, set)?;
            self.stat_of(&attr)
        })
    }

    /// Apply the fields of `stat` selected by the raw `mask` bits.
    pub fn setattr_raw(&self, path: &str, stat: &Stat, mask: u32) -> FsResult<Stat> {
        let mask = SetAttrMask::from_raw(mask)?;
        self.setattr(path, &SetAttr::from_stat(stat, mask))
    }

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.setattr(path, &SetAttr::new().with_perm(mode)).map(|_| ())
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.setattr(path, &SetAttr::new().with_owner(uid, gid))
            .map(|_| ())
    }

    /// Change ownership of a symlink itself.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.lchown")]
    pub fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.mounted(|m| {
            let found = self.resolve(m, path, FinalLink::NoFollow)?;
            self.ns
                .setattr(found.attr.ino, &SetAttr::new().with_owner(uid, gid))?;
            Ok(())
        })
    }

    pub fn utime(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        self.setattr(path, &SetAttr::new().with_atime(atime).with_mtime(mtime))
            .map(|_| ())
    }

    /// Resize a file. Growing zero-fills.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.truncate")]
    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.mounted(|m| {
            let found = self.resolve(m, path, FinalLink::Follow)?;
            if found.attr.is_dir() {
                return Err(FsError::is_a_directory(path));
            }
            m.require(&found.attr, MAY_WRITE, path)?;
            self.ns.truncate(found.attr.ino, size)
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.mkdir")]
    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.mounted(|m| {
            let (dir, name) = self.writable_parent(m, path)?;
            self.ns
                .mkdir(dir, &name, mode & 0o7777, m.config.credentials())?;
            Ok(())
        })
    }

    /// Create `path` and every missing directory above it.
    ///
    /// Fails `AlreadyExists` if `path` itself already exists.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.mkdirs")]
    pub fn mkdirs(&self, path: &str, mode: u32) -> FsResult<()> {
        self.mounted(|m| {
            let resolver = m.resolver(&*self.ns);
            let cwd = m.cwd();
            let parts: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
            if parts.is_empty() {
                return Err(FsError::already_exists(path));
            }

            let mut prefix = if path.starts_with('/') {
                String::from("/")
            } else {
                String::new()
            };
            for (i, part) in parts.iter().enumerate() {
                if !prefix.is_empty() && !prefix.ends_with('/') {
                    prefix.push('/');
                }
                prefix.push_str(part);
                let is_last = i + 1 == parts.len();

                match resolver.resolve_or_missing(&cwd, &prefix, FinalLink::Follow)? {
                    Lookup::Found(_) if is_last => return Err(FsError::already_exists(path)),
                    Lookup::Found(found) if !found.attr.is_dir() => {
                        return Err(FsError::not_a_directory(prefix));
                    }
                    Lookup::Found(_) => {}
                    Lookup::Missing { parent, name } => {
                        let dir = self.ns.getattr(parent.current())?;
                        m.require(&dir, MAY_WRITE | MAY_EXEC, &prefix)?;
                        self.ns.mkdir(
                            parent.current(),
                            &name,
                            mode & 0o7777,
                            m.config.credentials(),
                        )?;
                        tracing::trace!(path = %prefix, "created");
                    }
                }
            }
            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.rmdir")]
    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        self.mounted(|m| {
            let (dir, name) = self.writable_parent(m, path)?;
            self.ns.rmdir(dir, &name)
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.unlink")]
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.mounted(|m| {
            let (dir, name) = self.writable_parent(m, path)?;
            self.ns.unlink(dir, &name)
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.rename")]
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.mounted(|m| {
            let (from_dir, from_name) = self.writable_parent(m, from)?;
            let (to_dir, to_name) = self.writable_parent(m, to)?;
            self.ns.rename(from_dir, &from_name, to_dir, &to_name)
        })
    }

    /// Hard link `newpath` to the object at `existing`.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.link")]
    pub fn link(&self, existing: &str, newpath: &str) -> FsResult<()> {
        self.mounted(|m| {
            let source = self.resolve(m, existing, FinalLink::NoFollow)?;
            let (dir, name) = self.writable_parent(m, newpath)?;
            self.ns.link(source.attr.ino, dir, &name)?;
            Ok(())
        })
    }

    /// Create `linkpath` as a symlink containing `target`.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.symlink")]
    pub fn symlink(&self, target: &str, linkpath: &str) -> FsResult<()> {
        self.mounted(|m| {
            let (dir, name) = self.writable_parent(m, linkpath)?;
            self.ns
                .symlink(dir, &name, target, m.config.credentials())?;
            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.readlink")]
    pub fn readlink(&self, path: &str) -> FsResult<String> {
        self.mounted(|m| {
            let found = self.resolve(m, path, FinalLink::NoFollow)?;
            if !found.attr.is_symlink() {
                return Err(FsError::invalid(format!("{path} is not a symlink")));
            }
            self.ns.readlink(found.attr.ino)
        })
    }

    /// Flush everything.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.sync_fs")]
    pub fn sync_fs(&self) -> FsResult<()> {
        self.mounted(|_| self.ns.sync_fs())
    }

    /// Hint that reads should prefer a nearby replica. Results are the same
    /// either way.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.localize_reads")]
    pub fn localize_reads(&self, on: bool) -> FsResult<()> {
        self.mounted(|m| {
            m.localize_reads.store(on, Ordering::Relaxed);
            Ok(())
        })
    }

    pub fn localizes_reads(&self) -> FsResult<bool> {
        self.mounted(|m| Ok(m.localize_reads.load(Ordering::Relaxed)))
    }

    // ========================================================================
    // Directories
    // ========================================================================

    #[tracing::instrument(level = "debug", skip(self), name = "fs.opendir")]
    pub fn opendir(&self, path: &str) -> FsResult<DirId> {
        self.mounted(|m| {
            let id = self.dirs.next_id()?;
            let stream = self.dir_stream(m, path, id)?;
            Ok(self.dirs.insert(stream))
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.closedir")]
    pub fn closedir(&self, dir: DirId) -> FsResult<()> {
        self.mounted(|_| self.dirs.remove(dir))
    }

    /// Next entry, or `None` at end of stream.
    #[tracing::instrument(level = "trace", skip(self), name = "fs.readdir")]
    pub fn readdir(&self, dir: DirId) -> FsResult<Option<DirEntry>> {
        self.with_cursor(dir, |s| Ok(s.next_entry(&*self.ns)?.map(|e| e.entry)))
    }

    /// Next entry with its attributes and the mask of fields filled in.
    ///
    /// The cursor only moves once the attributes are built, so a failure
    /// leaves the entry to be read again.
    #[tracing::instrument(level = "trace", skip(self), name = "fs.readdirplus")]
    pub fn readdirplus(&self, dir: DirId) -> FsResult<Option<(DirEntry, Stat, StatMask)>> {
        self.with_cursor(dir, |s| {
            let item = match s.peek(&*self.ns)? {
                None => return Ok(None),
                Some(CursorEntry {
                    entry,
                    attr: Some(attr),
                }) => (entry.clone(), self.stat_of(attr)?, StatMask::all()),
                Some(CursorEntry { entry, attr: None }) => {
                    let stat = Stat {
                        ino: entry.ino.get(),
                        mode: entry.kind.mode_bits(),
                        ..Stat::default()
                    };
                    (entry.clone(), stat, StatMask::basic())
                }
            };
            s.advance();
            Ok(Some(item))
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.telldir")]
    pub fn telldir(&self, dir: DirId) -> FsResult<u64> {
        self.with_cursor(dir, |s| Ok(s.tell()))
    }

    /// Seek to a token from [`telldir`](Self::telldir) on the same cursor.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.seekdir")]
    pub fn seekdir(&self, dir: DirId, token: u64) -> FsResult<()> {
        self.with_cursor(dir, |s| s.seek(token))
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.rewinddir")]
    pub fn rewinddir(&self, dir: DirId) -> FsResult<()> {
        self.with_cursor(dir, |s| {
            s.rewind();
            Ok(())
        })
    }

    /// Fill `buf` with whole dirent records; returns bytes written.
    #[tracing::instrument(level = "debug", skip(self, buf), fields(len = buf.len()), name = "fs.getdents")]
    pub fn getdents(&self, dir: DirId, buf: &mut [u8]) -> FsResult<usize> {
        self.with_cursor(dir, |s| s.getdents(&*self.ns, buf))
    }

    /// Fill `buf` with whole NUL-terminated names; returns bytes written.
    #[tracing::instrument(level = "debug", skip(self, buf), fields(len = buf.len()), name = "fs.getdnames")]
    pub fn getdnames(&self, dir: DirId, buf: &mut [u8]) -> FsResult<usize> {
        self.with_cursor(dir, |s| s.getdnames(&*self.ns, buf))
    }

    /// Names of every child of `path`, without `.` and `..`.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.listdir")]
    pub fn listdir(&self, path: &str) -> FsResult<Vec<String>> {
        self.mounted(|m| {
            let mut stream = self.dir_stream(m, path, 0)?;
            let mut names = Vec::new();
            let mut index = 0usize;
            while let Some(e) = stream.next_entry(&*self.ns)? {
                if index >= 2 {
                    names.push(e.entry.name);
                }
                index += 1;
            }
            Ok(names)
        })
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Open (and with `CREAT`, possibly create) a file.
    pub fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> FsResult<Fd> {
        self.open_inner(path, flags, mode, None)
    }

    /// Open, creating with `layout` if the file does not exist yet.
    pub fn open_layout(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
        layout: &FileLayout,
    ) -> FsResult<Fd> {
        layout.validate()?;
        self.open_inner(path, flags, mode, Some(layout))
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.open")]
    fn open_inner(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
        layout: Option<&FileLayout>,
    ) -> FsResult<Fd> {
        let access = flags.access_mode()?;
        self.mounted(|m| {
            let resolver = m.resolver(&*self.ns);
            let cwd = m.cwd();

            let (attr, created) = if flags.is_create() {
                // An exclusive create must not follow a final symlink.
                let last = if flags.is_exclusive() {
                    FinalLink::NoFollow
                } else {
                    FinalLink::Follow
                };
                match resolver.resolve_or_missing(&cwd, path, last)? {
                    Lookup::Found(_) if flags.is_exclusive() => {
                        return Err(FsError::already_exists(path));
                    }
                    Lookup::Found(found) => (found.attr, false),
                    Lookup::Missing { .. } if path.ends_with('/') => {
                        return Err(FsError::is_a_directory(path));
                    }
                    Lookup::Missing { parent, name } => {
                        let dir = self.ns.getattr(parent.current())?;
                        m.require(&dir, MAY_WRITE | MAY_EXEC, path)?;
                        let layout = layout
                            .cloned()
                            .unwrap_or_else(|| m.config.default_layout());
                        let attr = self.ns.create(
                            parent.current(),
                            &name,
                            mode & 0o7777,
                            m.config.credentials(),
                            &layout,
                        )?;
                        (attr, true)
                    }
                }
            } else {
                (resolver.resolve(&cwd, path, FinalLink::Follow)?.attr, false)
            };

            if attr.is_dir() && access.can_write() {
                return Err(FsError::is_a_directory(path));
            }
            if !created {
                let mut want = 0;
                if access.can_read() {
                    want |= MAY_READ;
                }
                if access.can_write() || flags.is_truncate() {
                    want |= MAY_WRITE;
                }
                m.require(&attr, want, path)?;
                if flags.is_truncate() && attr.is_file() && attr.size > 0 {
                    self.ns.truncate(attr.ino, 0)?;
                }
            }

            let fd = self
                .files
                .insert(OpenFile::new(attr.ino, access, flags.is_append(), path))?;
            tracing::debug!(%fd, ino = %attr.ino, created, "opened");
            Ok(fd)
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.close")]
    pub fn close(&self, fd: Fd) -> FsResult<()> {
        self.mounted(|_| self.files.remove(fd).map(|_| ()))
    }

    /// Read into `buf` at `offset`, or at the handle's cursor when `offset`
    /// is `-1` (advancing it). Returns bytes read; 0 at end of file.
    #[tracing::instrument(level = "trace", skip(self, buf), fields(len = buf.len()), name = "fs.read")]
    pub fn read(&self, fd: Fd, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        self.with_file(fd, |file| {
            file.check_readable(fd)?;
            let explicit = io_offset(offset)?;
            let start = explicit.unwrap_or_else(|| file.offset());
            let data = self.ns.read(file.ino(), start, buf.len())?;
            buf[..data.len()].copy_from_slice(&data);
            if explicit.is_none() {
                file.set_offset(start + data.len() as u64);
            }
            Ok(data.len())
        })
    }

    /// Write `data` at `offset`, or at the handle's cursor when `offset` is
    /// `-1` (advancing it; with `APPEND` the cursor write goes to the end).
    #[tracing::instrument(level = "trace", skip(self, data), fields(len = data.len()), name = "fs.write")]
    pub fn write(&self, fd: Fd, data: &[u8], offset: i64) -> FsResult<usize> {
        self.with_file(fd, |file| {
            file.check_writable(fd)?;
            let explicit = io_offset(offset)?;
            let start = match explicit {
                Some(at) => at,
                None if file.is_append() => self.ns.getattr(file.ino())?.size,
                None => file.offset(),
            };
            let written = self.ns.write(file.ino(), start, data)?;
            if explicit.is_none() {
                file.set_offset(start + written as u64);
            }
            Ok(written)
        })
    }

    /// Move the handle's cursor; returns the new absolute offset.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.lseek")]
    pub fn lseek(&self, fd: Fd, offset: i64, whence: Whence) -> FsResult<u64> {
        self.with_file(fd, |file| {
            let base = match whence {
                Whence::Set => 0,
                Whence::Cur => file.offset(),
                Whence::End => self.ns.getattr(file.ino())?.size,
            };
            let base = i64::try_from(base)
                .map_err(|_| FsError::invalid(format!("offset {base} out of range")))?;
            let target = base
                .checked_add(offset)
                .filter(|t| *t >= 0)
                .ok_or_else(|| FsError::invalid(format!("seek to {base} + {offset}")))?;
            file.set_offset(target as u64);
            Ok(target as u64)
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.ftruncate")]
    pub fn ftruncate(&self, fd: Fd, size: u64) -> FsResult<()> {
        self.with_file(fd, |file| {
            file.check_writable(fd)?;
            self.ns.truncate(file.ino(), size)
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.fsync")]
    pub fn fsync(&self, fd: Fd, dataonly: bool) -> FsResult<()> {
        self.with_file(fd, |file| self.ns.fsync(file.ino(), dataonly))
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.fstat")]
    pub fn fstat(&self, fd: Fd) -> FsResult<Stat> {
        self.with_file(fd, |file| self.stat_of(&self.ns.getattr(file.ino())?))
    }

    /// Change mode bits. The handle keeps the access it was opened with.
    #[tracing::instrument(level = "debug", skip(self), name = "fs.fchmod")]
    pub fn fchmod(&self, fd: Fd, mode: u32) -> FsResult<()> {
        self.with_file(fd, |file| {
            self.ns
                .setattr(file.ino(), &SetAttr::new().with_perm(mode))?;
            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.fchown")]
    pub fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> FsResult<()> {
        self.with_file(fd, |file| {
            self.ns
                .setattr(file.ino(), &SetAttr::new().with_owner(uid, gid))?;
            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.get_file_layout")]
    pub fn get_file_layout(&self, fd: Fd) -> FsResult<FileLayout> {
        self.with_file(fd, |file| self.ns.layout(file.ino()))
    }

    pub fn get_file_stripe_unit(&self, fd: Fd) -> FsResult<u32> {
        self.get_file_layout(fd).map(|l| l.stripe_unit)
    }

    pub fn get_file_pool_name(&self, fd: Fd) -> FsResult<String> {
        self.get_file_layout(fd).map(|l| l.pool)
    }

    /// Replica count of the pool holding the file.
    pub fn get_file_replication(&self, fd: Fd) -> FsResult<u32> {
        let layout = self.get_file_layout(fd)?;
        self.mounted(|_| self.ns.pool_replication(&layout.pool))
    }

    // ========================================================================
    // Extended attributes
    // ========================================================================

    fn xattr_op<T>(
        &self,
        path: &str,
        last: FinalLink,
        op: impl FnOnce(&AttrStore<'_>, InodeId) -> FsResult<T>,
    ) -> FsResult<T> {
        self.mounted(|m| {
            let found = self.resolve(m, path, last)?;
            op(&AttrStore::new(&*self.ns, &m.config), found.attr.ino)
        })
    }

    /// Two-phase get: with no buffer (or an empty one) returns the size.
    #[tracing::instrument(level = "debug", skip(self, buf), name = "fs.getxattr")]
    pub fn getxattr(&self, path: &str, name: &str, buf: Option<&mut [u8]>) -> FsResult<usize> {
        self.xattr_op(path, FinalLink::Follow, |store, ino| store.get(ino, name, buf))
    }

    #[tracing::instrument(level = "debug", skip(self, buf), name = "fs.lgetxattr")]
    pub fn lgetxattr(&self, path: &str, name: &str, buf: Option<&mut [u8]>) -> FsResult<usize> {
        self.xattr_op(path, FinalLink::NoFollow, |store, ino| store.get(ino, name, buf))
    }

    #[tracing::instrument(level = "debug", skip(self, value), name = "fs.setxattr")]
    pub fn setxattr(&self, path: &str, name: &str, value: &[u8], mode: XattrMode) -> FsResult<()> {
        self.xattr_op(path, FinalLink::Follow, |store, ino| {
            store.set(ino, name, value, mode)
        })
    }

    #[tracing::instrument(level = "debug", skip(self, value), name = "fs.lsetxattr")]
    pub fn lsetxattr(&self, path: &str, name: &str, value: &[u8], mode: XattrMode) -> FsResult<()> {
        self.xattr_op(path, FinalLink::NoFollow, |store, ino| {
            store.set(ino, name, value, mode)
        })
    }

    /// Two-phase list of NUL-terminated names.
    #[tracing::instrument(level = "debug", skip(self, buf), name = "fs.listxattr")]
    pub fn listxattr(&self, path: &str, buf: Option<&mut [u8]>) -> FsResult<usize> {
        self.xattr_op(path, FinalLink::Follow, |store, ino| store.list(ino, buf))
    }

    #[tracing::instrument(level = "debug", skip(self, buf), name = "fs.llistxattr")]
    pub fn llistxattr(&self, path: &str, buf: Option<&mut [u8]>) -> FsResult<usize> {
        self.xattr_op(path, FinalLink::NoFollow, |store, ino| store.list(ino, buf))
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.removexattr")]
    pub fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.xattr_op(path, FinalLink::Follow, |store, ino| store.remove(ino, name))
    }

    #[tracing::instrument(level = "debug", skip(self), name = "fs.lremovexattr")]
    pub fn lremovexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.xattr_op(path, FinalLink::NoFollow, |store, ino| store.remove(ino, name))
    }

    /// Whole attribute value, negotiating the buffer size.
    pub fn getxattr_vec(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        negotiate(name, |buf| self.getxattr(path, name, buf))
    }

    /// Every visible attribute name, negotiating the buffer size.
    pub fn listxattr_names(&self, path: &str) -> FsResult<Vec<String>> {
        let list = negotiate("listxattr", |buf| self.listxattr(path, buf))?;
        Ok(split_nul_list(&list))
    }
}

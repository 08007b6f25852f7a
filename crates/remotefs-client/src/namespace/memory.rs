//! In-memory namespace.
//!
//! Inode table with link counts, name-ordered children, per-inode extended
//! attributes and a small pool table. All data is lost when dropped.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::time::SystemTime;

use remotefs_types::{
    Credentials, DirEntry, FileAttr, FileLayout, FileType, FsError, FsResult, InodeId, NAME_MAX,
    SetAttr, StatFs, XattrMode,
};

use super::{ReaddirEntry, RemoteNamespace};

const ROOT: InodeId = InodeId(1);

/// Byte length of file contents ending at `end`.
fn content_len(end: u64) -> FsResult<usize> {
    usize::try_from(end).map_err(|_| FsError::out_of_memory(format!("{end} bytes")))
}

/// Resize file contents, zero-filling growth. A failed allocation fails the
/// call instead of aborting.
fn resize_data(data: &mut Vec<u8>, len: usize) -> FsResult<()> {
    if len > data.len() {
        data.try_reserve_exact(len - data.len())
            .map_err(|e| FsError::out_of_memory(format!("grow to {len} bytes: {e}")))?;
    }
    data.resize(len, 0);
    Ok(())
}

#[derive(Debug, Clone)]
enum Body {
    Directory {
        parent: InodeId,
        children: BTreeMap<String, InodeId>,
    },
    File {
        data: Vec<u8>,
        layout: FileLayout,
    },
    Symlink {
        target: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    attr: FileAttr,
    body: Body,
    xattrs: BTreeMap<String, Vec<u8>>,
}

impl Node {
    fn touch(&mut self) {
        let now = SystemTime::now();
        self.attr.mtime = now;
        self.attr.ctime = now;
    }
}

#[derive(Debug)]
struct Inodes {
    nodes: HashMap<InodeId, Node>,
    next: u64,
}

impl Inodes {
    fn get(&self, ino: InodeId) -> FsResult<&Node> {
        self.nodes
            .get(&ino)
            .ok_or_else(|| FsError::not_found(format!("inode {ino}")))
    }

    fn get_mut(&mut self, ino: InodeId) -> FsResult<&mut Node> {
        self.nodes
            .get_mut(&ino)
            .ok_or_else(|| FsError::not_found(format!("inode {ino}")))
    }

    fn children(&self, dir: InodeId) -> FsResult<&BTreeMap<String, InodeId>> {
        match &self.get(dir)?.body {
            Body::Directory { children, .. } => Ok(children),
            _ => Err(FsError::not_a_directory(format!("inode {dir}"))),
        }
    }

    fn children_mut(&mut self, dir: InodeId) -> FsResult<&mut BTreeMap<String, InodeId>> {
        match &mut self.get_mut(dir)?.body {
            Body::Directory { children, .. } => Ok(children),
            _ => Err(FsError::not_a_directory(format!("inode {dir}"))),
        }
    }

    fn child(&self, dir: InodeId, name: &str) -> FsResult<InodeId> {
        self.children(dir)?
            .get(name)
            .copied()
            .ok_or_else(|| FsError::not_found(name))
    }

    fn alloc(&mut self) -> InodeId {
        let ino = InodeId(self.next);
        self.next += 1;
        ino
    }

    /// Insert a fresh node under `dir/name`, which must not exist yet.
    fn insert(
        &mut self,
        dir: InodeId,
        name: &str,
        kind: FileType,
        perm: u32,
        owner: Credentials,
        body: Body,
    ) -> FsResult<FileAttr> {
        if self.children(dir)?.contains_key(name) {
            return Err(FsError::already_exists(name));
        }
        let ino = self.alloc();
        let attr = FileAttr::new(ino, kind, perm, owner);
        self.nodes.insert(
            ino,
            Node {
                attr: attr.clone(),
                body,
                xattrs: BTreeMap::new(),
            },
        );
        self.children_mut(dir)?.insert(name.to_string(), ino);
        let parent = self.get_mut(dir)?;
        if kind.is_dir() {
            parent.attr.nlink += 1;
        }
        parent.touch();
        Ok(attr)
    }

    /// Drop one link to `ino`, freeing it when none remain.
    fn release_link(&mut self, ino: InodeId) -> FsResult<()> {
        let node = self.get_mut(ino)?;
        node.attr.nlink = node.attr.nlink.saturating_sub(1);
        node.attr.ctime = SystemTime::now();
        if node.attr.nlink == 0 {
            self.nodes.remove(&ino);
        }
        Ok(())
    }

    /// True if `ino` is `ancestor` or lies beneath it.
    fn is_within(&self, mut ino: InodeId, ancestor: InodeId) -> FsResult<bool> {
        loop {
            if ino == ancestor {
                return Ok(true);
            }
            match &self.get(ino)?.body {
                Body::Directory { parent, .. } if *parent != ino => ino = *parent,
                _ => return Ok(false),
            }
        }
    }

    fn file_data_mut(&mut self, ino: InodeId) -> FsResult<(&mut Vec<u8>, &mut FileAttr)> {
        let node = self.get_mut(ino)?;
        match &mut node.body {
            Body::File { data, .. } => Ok((data, &mut node.attr)),
            Body::Directory { .. } => Err(FsError::is_a_directory(format!("inode {ino}"))),
            Body::Symlink { .. } => Err(FsError::invalid(format!("inode {ino} is a symlink"))),
        }
    }
}

/// In-memory [`RemoteNamespace`].
///
/// Thread-safe via an internal `RwLock`.
#[derive(Debug)]
pub struct MemoryNamespace {
    inodes: RwLock<Inodes>,
    pools: BTreeMap<String, u32>,
    readdir_attrs: bool,
    fsid: u64,
}

impl Default for MemoryNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNamespace {
    /// Empty namespace: a root directory (0755, owned by 0:0) and one
    /// pool, `data`, with three replicas.
    pub fn new() -> Self {
        let root = Node {
            attr: FileAttr::new(ROOT, FileType::Directory, 0o755, Credentials::default()),
            body: Body::Directory {
                parent: ROOT,
                children: BTreeMap::new(),
            },
            xattrs: BTreeMap::new(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, root);

        let mut pools = BTreeMap::new();
        pools.insert("data".to_string(), 3);

        Self {
            inodes: RwLock::new(Inodes { nodes, next: 2 }),
            pools,
            readdir_attrs: true,
            fsid: 0x7266_735f_6d65_6d00,
        }
    }

    /// Add (or replace) a pool.
    pub fn with_pool(mut self, name: impl Into<String>, replication: u32) -> Self {
        self.pools.insert(name.into(), replication);
        self
    }

    /// Set the root directory's permission bits and owner.
    pub fn with_root(self, perm: u32, owner: Credentials) -> Self {
        {
            let mut inodes = self.inodes.write();
            if let Some(root) = inodes.nodes.get_mut(&ROOT) {
                root.attr.perm = perm & 0o7777;
                root.attr.uid = owner.uid;
                root.attr.gid = owner.gid;
            }
        }
        self
    }

    /// Return names only from `readdir`, like a store that does not ship
    /// attributes with listings.
    pub fn without_readdir_attrs(mut self) -> Self {
        self.readdir_attrs = false;
        self
    }

    /// Number of live inodes, root included.
    pub fn inode_count(&self) -> usize {
        self.inodes.read().nodes.len()
    }

    fn check_name(name: &str) -> FsResult<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(FsError::invalid(format!("bad entry name {name:?}")));
        }
        if name.len() > NAME_MAX {
            return Err(FsError::invalid(format!("name too long: {name}")));
        }
        Ok(())
    }
}

impl RemoteNamespace for MemoryNamespace {
    fn root(&self) -> InodeId {
        ROOT
    }

    fn lookup(&self, dir: InodeId, name: &str) -> FsResult<FileAttr> {
        let inodes = self.inodes.read();
        let ino = inodes.child(dir, name)?;
        Ok(inodes.get(ino)?.attr.clone())
    }

    fn getattr(&self, ino: InodeId) -> FsResult<FileAttr> {
        Ok(self.inodes.read().get(ino)?.attr.clone())
    }

    fn readdir(
        &self,
        dir: InodeId,
        after: Option<&str>,
        max: usize,
    ) -> FsResult<Vec<ReaddirEntry>> {
        let inodes = self.inodes.read();
        let children = inodes.children(dir)?;
        let start = match after {
            Some(name) => Bound::Excluded(name),
            None => Bound::Unbounded,
        };

        let mut out = Vec::new();
        for (name, &ino) in children.range::<str, _>((start, Bound::Unbounded)).take(max) {
            let attr = &inodes.get(ino)?.attr;
            out.push(ReaddirEntry {
                entry: DirEntry::new(name.clone(), ino, attr.kind),
                attr: self.readdir_attrs.then(|| attr.clone()),
            });
        }
        Ok(out)
    }

    fn readlink(&self, ino: InodeId) -> FsResult<String> {
        match &self.inodes.read().get(ino)?.body {
            Body::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::invalid(format!("inode {ino} is not a symlink"))),
        }
    }

    fn create(
        &self,
        dir: InodeId,
        name: &str,
        perm: u32,
        owner: Credentials,
        layout: &FileLayout,
    ) -> FsResult<FileAttr> {
        Self::check_name(name)?;
        layout.validate()?;
        if !self.pools.contains_key(&layout.pool) {
            return Err(FsError::invalid(format!("unknown pool {}", layout.pool)));
        }
        let body = Body::File {
            data: Vec::new(),
            layout: layout.clone(),
        };
        self.inodes
            .write()
            .insert(dir, name, FileType::File, perm, owner, body)
    }

    fn mkdir(&self, dir: InodeId, name: &str, perm: u32, owner: Credentials) -> FsResult<FileAttr> {
        Self::check_name(name)?;
        let body = Body::Directory {
            parent: dir,
            children: BTreeMap::new(),
        };
        self.inodes
            .write()
            .insert(dir, name, FileType::Directory, perm, owner, body)
    }

    fn symlink(
        &self,
        dir: InodeId,
        name: &str,
        target: &str,
        owner: Credentials,
    ) -> FsResult<FileAttr> {
        Self::check_name(name)?;
        if target.is_empty() {
            return Err(FsError::not_found("empty symlink target"));
        }
        let body = Body::Symlink {
            target: target.to_string(),
        };
        let mut inodes = self.inodes.write();
        let mut attr = inodes.insert(dir, name, FileType::Symlink, 0o777, owner, body)?;
        attr.size = target.len() as u64;
        inodes.get_mut(attr.ino)?.attr.size = attr.size;
        Ok(attr)
    }

    fn link(&self, ino: InodeId, dir: InodeId, name: &str) -> FsResult<FileAttr> {
        Self::check_name(name)?;
        let mut inodes = self.inodes.write();
        if inodes.get(ino)?.attr.is_dir() {
            return Err(FsError::is_a_directory(format!("inode {ino}")));
        }
        if inodes.children(dir)?.contains_key(name) {
            return Err(FsError::already_exists(name));
        }
        inodes.children_mut(dir)?.insert(name.to_string(), ino);
        inodes.get_mut(dir)?.touch();

        let node = inodes.get_mut(ino)?;
        node.attr.nlink += 1;
        node.attr.ctime = SystemTime::now();
        Ok(node.attr.clone())
    }

    fn unlink(&self, dir: InodeId, name: &str) -> FsResult<()> {
        let mut inodes = self.inodes.write();
        let ino = inodes.child(dir, name)?;
        if inodes.get(ino)?.attr.is_dir() {
            return Err(FsError::is_a_directory(name));
        }
        inodes.children_mut(dir)?.remove(name);
        inodes.get_mut(dir)?.touch();
        inodes.release_link(ino)
    }

    fn rmdir(&self, dir: InodeId, name: &str) -> FsResult<()> {
        let mut inodes = self.inodes.write();
        let ino = inodes.child(dir, name)?;
        match &inodes.get(ino)?.body {
            Body::Directory { children, .. } if !children.is_empty() => {
                return Err(FsError::directory_not_empty(name));
            }
            Body::Directory { .. } => {}
            _ => return Err(FsError::not_a_directory(name)),
        }
        inodes.children_mut(dir)?.remove(name);
        inodes.nodes.remove(&ino);
        let parent = inodes.get_mut(dir)?;
        parent.attr.nlink = parent.attr.nlink.saturating_sub(1);
        parent.touch();
        Ok(())
    }

    fn rename(
        &self,
        from_dir: InodeId,
        from_name: &str,
        to_dir: InodeId,
        to_name: &str,
    ) -> FsResult<()> {
        Self::check_name(to_name)?;
        let mut inodes = self.inodes.write();
        let ino = inodes.child(from_dir, from_name)?;
        let moving_dir = inodes.get(ino)?.attr.is_dir();
        // Validate the destination directory before touching anything.
        inodes.children(to_dir)?;

        if moving_dir && inodes.is_within(to_dir, ino)? {
            return Err(FsError::invalid(format!(
                "cannot move {from_name} beneath itself"
            )));
        }

        let existing = inodes.children(to_dir)?.get(to_name).copied();
        if let Some(existing) = existing {
            if existing == ino {
                return Ok(());
            }
            // Some(empty?) for a directory target, None otherwise.
            let target_dir = match &inodes.get(existing)?.body {
                Body::Directory { children, .. } => Some(children.is_empty()),
                _ => None,
            };
            match (target_dir, moving_dir) {
                (Some(true), true) => {
                    inodes.nodes.remove(&existing);
                    let parent = inodes.get_mut(to_dir)?;
                    parent.attr.nlink = parent.attr.nlink.saturating_sub(1);
                }
                (Some(false), true) => return Err(FsError::directory_not_empty(to_name)),
                (Some(_), false) => return Err(FsError::is_a_directory(to_name)),
                (None, true) => return Err(FsError::not_a_directory(to_name)),
                (None, false) => inodes.release_link(existing)?,
            }
            inodes.children_mut(to_dir)?.remove(to_name);
        }

        inodes.children_mut(from_dir)?.remove(from_name);
        inodes.children_mut(to_dir)?.insert(to_name.to_string(), ino);

        if moving_dir {
            if let Body::Directory { parent, .. } = &mut inodes.get_mut(ino)?.body {
                *parent = to_dir;
            }
            let old_parent = inodes.get_mut(from_dir)?;
            old_parent.attr.nlink = old_parent.attr.nlink.saturating_sub(1);
            inodes.get_mut(to_dir)?.attr.nlink += 1;
        }
        inodes.get_mut(from_dir)?.touch();
        inodes.get_mut(to_dir)?.touch();
        inodes.get_mut(ino)?.attr.ctime = SystemTime::now();
        Ok(())
    }

    fn read(&self, ino: InodeId, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let inodes = self.inodes.read();
        match &inodes.get(ino)?.body {
            Body::File { data, .. } => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Body::Directory { .. } => Err(FsError::is_a_directory(format!("inode {ino}"))),
            Body::Symlink { .. } => Err(FsError::invalid(format!("inode {ino} is a symlink"))),
        }
    }

    fn write(&self, ino: InodeId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let mut inodes = self.inodes.write();
        let (file, attr) = inodes.file_data_mut(ino)?;
        let start = content_len(offset)?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| FsError::out_of_memory(format!("write of {} at {offset}", data.len())))?;
        if end > file.len() {
            resize_data(file, end)?;
        }
        file[start..end].copy_from_slice(data);
        attr.size = file.len() as u64;
        let now = SystemTime::now();
        attr.mtime = now;
        attr.ctime = now;
        Ok(data.len())
    }

    fn truncate(&self, ino: InodeId, size: u64) -> FsResult<()> {
        let mut inodes = self.inodes.write();
        let (file, attr) = inodes.file_data_mut(ino)?;
        resize_data(file, content_len(size)?)?;
        attr.size = size;
        let now = SystemTime::now();
        attr.mtime = now;
        attr.ctime = now;
        Ok(())
    }

    fn setattr(&self, ino: InodeId, set: &SetAttr) -> FsResult<FileAttr> {
        let mut inodes = self.inodes.write();
        if let Some(size) = set.size {
            let (file, attr) = inodes.file_data_mut(ino)?;
            resize_data(file, content_len(size)?)?;
            attr.size = size;
            attr.mtime = SystemTime::now();
        }

        let attr = &mut inodes.get_mut(ino)?.attr;
        if let Some(perm) = set.perm {
            attr.perm = perm & 0o7777;
        }
        if let Some(uid) = set.uid {
            attr.uid = uid;
        }
        if let Some(gid) = set.gid {
            attr.gid = gid;
        }
        if let Some(mtime) = set.mtime {
            attr.mtime = mtime;
        }
        if let Some(atime) = set.atime {
            attr.atime = atime;
        }
        attr.ctime = SystemTime::now();
        Ok(attr.clone())
    }

    fn getxattr(&self, ino: InodeId, name: &str) -> FsResult<Vec<u8>> {
        self.inodes
            .read()
            .get(ino)?
            .xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::no_data(name))
    }

    fn setxattr(&self, ino: InodeId, name: &str, value: &[u8], mode: XattrMode) -> FsResult<()> {
        if name.is_empty() {
            return Err(FsError::invalid("empty attribute name"));
        }
        let mut inodes = self.inodes.write();
        let node = inodes.get_mut(ino)?;
        let exists = node.xattrs.contains_key(name);
        match mode {
            XattrMode::CreateOnly if exists => return Err(FsError::already_exists(name)),
            XattrMode::ReplaceOnly if !exists => return Err(FsError::no_data(name)),
            _ => {}
        }
        node.xattrs.insert(name.to_string(), value.to_vec());
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    fn listxattr(&self, ino: InodeId) -> FsResult<Vec<String>> {
        Ok(self.inodes.read().get(ino)?.xattrs.keys().cloned().collect())
    }

    fn removexattr(&self, ino: InodeId, name: &str) -> FsResult<()> {
        let mut inodes = self.inodes.write();
        let node = inodes.get_mut(ino)?;
        node.xattrs
            .remove(name)
            .ok_or_else(|| FsError::no_data(name))?;
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    fn layout(&self, ino: InodeId) -> FsResult<FileLayout> {
        match &self.inodes.read().get(ino)?.body {
            Body::File { layout, .. } => Ok(layout.clone()),
            _ => Err(FsError::invalid(format!("inode {ino} has no layout"))),
        }
    }

    fn pool_replication(&self, pool: &str) -> FsResult<u32> {
        self.pools
            .get(pool)
            .copied()
            .ok_or_else(|| FsError::not_found(format!("pool {pool}")))
    }

    fn statfs(&self) -> FsResult<StatFs> {
        let inodes = self.inodes.read();
        let used: u64 = inodes
            .nodes
            .values()
            .map(|n| match &n.body {
                Body::File { data, .. } => (data.len() as u64).div_ceil(4096),
                _ => 0,
            })
            .sum();
        let base = StatFs::default();
        Ok(StatFs {
            bfree: base.blocks.saturating_sub(used),
            bavail: base.blocks.saturating_sub(used),
            ffree: base.files.saturating_sub(inodes.nodes.len() as u64),
            fsid: self.fsid,
            ..base
        })
    }
}

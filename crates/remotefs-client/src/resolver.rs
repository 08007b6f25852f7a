//! Path resolution.
//!
//! Paths are walked one component at a time against the namespace. The walk
//! is iterative: pending components sit in a queue, and a symlink's target
//! is spliced onto the front of that queue instead of recursing. Each
//! expansion spends one unit of a fixed budget, so any cycle (`a -> a`,
//! `a -> b -> c -> a`) ends in `SymlinkLoop` once the budget is gone.
//!
//! The walk keeps the chain of directories from the mount root so `..`
//! can step back without asking the namespace for parents. `..` at the
//! mount root stays at the root.

use std::collections::VecDeque;

use remotefs_types::{Credentials, FileAttr, FsError, FsErrorKind, FsResult, InodeId};

use crate::namespace::RemoteNamespace;

/// Read permission bit (per class).
pub const MAY_READ: u32 = 4;
/// Write permission bit (per class).
pub const MAY_WRITE: u32 = 2;
/// Execute / search permission bit (per class).
pub const MAY_EXEC: u32 = 1;

/// Check `want` (a combination of `MAY_*`) against the mode bits of `attr`.
///
/// Owner bits apply when the uid matches, else group bits when the gid
/// matches, else other bits. There is no superuser override.
pub fn permits(attr: &FileAttr, creds: Credentials, want: u32) -> bool {
    let bits = if creds.uid == attr.uid {
        (attr.perm >> 6) & 7
    } else if creds.gid == attr.gid {
        (attr.perm >> 3) & 7
    } else {
        attr.perm & 7
    };
    bits & want == want
}

/// Walked position in the namespace: the names and inodes from the mount
/// root down to some object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChain {
    root: InodeId,
    steps: Vec<(String, InodeId)>,
}

impl PathChain {
    /// A chain standing at `root`.
    pub fn new(root: InodeId) -> Self {
        Self {
            root,
            steps: Vec::new(),
        }
    }

    pub fn root(&self) -> InodeId {
        self.root
    }

    /// The object this chain ends at.
    pub fn current(&self) -> InodeId {
        self.steps.last().map(|(_, ino)| *ino).unwrap_or(self.root)
    }

    /// The directory holding [`current`](Self::current). The root is its
    /// own parent.
    pub fn parent(&self) -> InodeId {
        match self.steps.len() {
            0 | 1 => self.root,
            n => self.steps[n - 2].1,
        }
    }

    /// Name of the last step, if any.
    pub fn name(&self) -> Option<&str> {
        self.steps.last().map(|(name, _)| name.as_str())
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    fn push(&mut self, name: String, ino: InodeId) {
        self.steps.push((name, ino));
    }

    fn pop(&mut self) {
        self.steps.pop();
    }

    fn reset(&mut self) {
        self.steps.clear();
    }

    /// Absolute path from the mount root.
    pub fn path(&self) -> String {
        if self.steps.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for (name, _) in &self.steps {
            out.push('/');
            out.push_str(name);
        }
        out
    }
}

/// What to do when the last component is a symlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalLink {
    Follow,
    NoFollow,
}

/// A path that resolved to an existing object.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Chain ending at the object.
    pub chain: PathChain,
    pub attr: FileAttr,
}

/// Result of a resolution that tolerates a missing last component.
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(Resolved),
    /// Everything but the last component exists; `parent` is a directory.
    Missing { parent: PathChain, name: String },
}

fn components(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Resolves paths for one mount.
pub struct Resolver<'a> {
    ns: &'a dyn RemoteNamespace,
    creds: Credentials,
    check_perms: bool,
    max_symlinks: u32,
}

impl<'a> Resolver<'a> {
    pub fn new(
        ns: &'a dyn RemoteNamespace,
        creds: Credentials,
        check_perms: bool,
        max_symlinks: u32,
    ) -> Self {
        Self {
            ns,
            creds,
            check_perms,
            max_symlinks,
        }
    }

    /// Resolve `path` to an existing object.
    pub fn resolve(&self, cwd: &PathChain, path: &str, last: FinalLink) -> FsResult<Resolved> {
        match self.walk(cwd, path, last, false)? {
            Lookup::Found(found) => Ok(found),
            Lookup::Missing { name, .. } => Err(FsError::not_found(name)),
        }
    }

    /// Resolve `path`, reporting a missing last component instead of failing.
    ///
    /// A dangling symlink in last position reports its target's name, so
    /// creating through it creates the target. A missing name written with a
    /// trailing slash is still reported as missing; callers creating a file
    /// must reject it.
    pub fn resolve_or_missing(
        &self,
        cwd: &PathChain,
        path: &str,
        last: FinalLink,
    ) -> FsResult<Lookup> {
        self.walk(cwd, path, last, true)
    }

    /// Resolve everything but the last component, which is returned as-is.
    ///
    /// Used by operations that act on a name in a directory (mkdir, unlink,
    /// rename, symlink, link).
    pub fn resolve_parent(&self, cwd: &PathChain, path: &str) -> FsResult<(PathChain, String)> {
        if path.is_empty() {
            return Err(FsError::not_found("empty path"));
        }
        let trimmed = path.trim_end_matches('/');
        let (dir, name) = match trimmed.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((dir, name)) => (dir, name),
            None => (".", trimmed),
        };
        if name.is_empty() || name == "." || name == ".." {
            return Err(FsError::invalid(format!("{path}: no usable final component")));
        }

        let parent = self.resolve(cwd, dir, FinalLink::Follow)?;
        if !parent.attr.is_dir() {
            return Err(FsError::not_a_directory(dir));
        }
        if trimmed.len() < path.len() {
            // A trailing slash names a directory; an existing non-directory fails.
            self.walk(cwd, path, FinalLink::Follow, true)?;
        }
        Ok((parent.chain, name.to_string()))
    }

    fn check_search(&self, dir: &FileAttr, path: &str) -> FsResult<()> {
        if self.check_perms && !permits(dir, self.creds, MAY_EXEC) {
            return Err(FsError::permission_denied(path));
        }
        Ok(())
    }

    fn walk(
        &self,
        cwd: &PathChain,
        path: &str,
        last: FinalLink,
        allow_missing: bool,
    ) -> FsResult<Lookup> {
        if path.is_empty() {
            return Err(FsError::not_found("empty path"));
        }

        // `name/` must resolve to a directory, following a final symlink.
        let want_dir = path.ends_with('/');
        let last = if want_dir { FinalLink::Follow } else { last };

        let mut chain = if path.starts_with('/') {
            PathChain::new(cwd.root())
        } else {
            cwd.clone()
        };
        let mut queue: VecDeque<String> = components(path).map(str::to_string).collect();
        let mut dir = self.ns.getattr(chain.current())?;
        let mut expansions = 0u32;

        while let Some(name) = queue.pop_front() {
            let is_last = queue.is_empty();
            match name.as_str() {
                "." => continue,
                ".." => {
                    chain.pop();
                    dir = self.ns.getattr(chain.current())?;
                    continue;
                }
                _ => {}
            }

            self.check_search(&dir, path)?;
            let child = match self.ns.lookup(chain.current(), &name) {
                Ok(attr) => attr,
                Err(e) if e.kind() == FsErrorKind::NotFound => {
                    if is_last && allow_missing {
                        return Ok(Lookup::Missing { parent: chain, name });
                    }
                    return Err(FsError::not_found(path));
                }
                Err(e) => return Err(e),
            };

            if child.is_symlink() && (!is_last || last == FinalLink::Follow) {
                expansions += 1;
                if expansions > self.max_symlinks {
                    tracing::debug!(path, expansions, "symlink budget exhausted");
                    return Err(FsError::symlink_loop(path));
                }
                let target = self.ns.readlink(child.ino)?;
                if target.starts_with('/') {
                    chain.reset();
                    dir = self.ns.getattr(chain.current())?;
                }
                for comp in components(&target).rev() {
                    queue.push_front(comp.to_string());
                }
                continue;
            }

            if is_last {
                if want_dir && !child.is_dir() {
                    return Err(FsError::not_a_directory(path));
                }
                chain.push(name, child.ino);
                return Ok(Lookup::Found(Resolved { chain, attr: child }));
            }
            if !child.is_dir() {
                return Err(FsError::not_a_directory(path));
            }
            chain.push(name, child.ino);
            dir = child;
        }

        // The walk ended on a directory reached through `.`, `..`, the root,
        // or a symlink to one of those.
        Ok(Lookup::Found(Resolved { chain, attr: dir }))
    }
}

//! Directory cursors.
//!
//! A cursor yields `.`, `..`, then the directory's children. Children are
//! fetched from the namespace in batches as the cursor advances and kept,
//! so a position is just an index into what has been fetched. Tokens handed
//! out by `telldir` carry the cursor id in the high 32 bits and that index
//! in the low 32 bits; a token from another cursor is rejected.
//!
//! Entries added or removed after a batch was fetched are not reflected in
//! it. A child that appears later is seen only if it sorts after the last
//! name fetched. `rewinddir` drops the fetched children and starts over.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use remotefs_types::{
    DIRENT_RECORD_SIZE, DirEntry, DirId, FileAttr, FileType, FsError, FsResult, InodeId,
};

use crate::namespace::RemoteNamespace;

/// One position in a cursor's sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    pub entry: DirEntry,
    /// Attributes, when the namespace supplied them with the listing.
    pub attr: Option<FileAttr>,
}

/// Enumeration state for one open directory.
#[derive(Debug)]
pub struct DirStream {
    id: u32,
    dir: InodeId,
    entries: Vec<CursorEntry>,
    complete: bool,
    pos: usize,
    batch: usize,
}

impl DirStream {
    /// Start before `.` of `dir`, whose parent is `parent`.
    pub fn new(id: u32, dir: &FileAttr, parent: &FileAttr, batch: usize) -> Self {
        let dot = |name: &str, attr: &FileAttr| CursorEntry {
            entry: DirEntry::new(name, attr.ino, FileType::Directory),
            attr: Some(attr.clone()),
        };
        Self {
            id,
            dir: dir.ino,
            entries: vec![dot(".", dir), dot("..", parent)],
            complete: false,
            pos: 0,
            batch: batch.max(1),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn dir(&self) -> InodeId {
        self.dir
    }

    /// Fetch batches until index `want` exists or the listing is done.
    fn fill_to(&mut self, ns: &dyn RemoteNamespace, want: usize) -> FsResult<()> {
        while want >= self.entries.len() && !self.complete {
            let after = if self.entries.len() > 2 {
                self.entries.last().map(|e| e.entry.name.clone())
            } else {
                None
            };
            let page = ns.readdir(self.dir, after.as_deref(), self.batch)?;
            if page.len() < self.batch {
                self.complete = true;
            }
            tracing::trace!(dir = %self.dir, fetched = page.len(), "readdir batch");
            self.entries.extend(page.into_iter().map(|e| CursorEntry {
                entry: e.entry,
                attr: e.attr,
            }));
        }
        Ok(())
    }

    /// The entry at the current position, without advancing.
    pub fn peek(&mut self, ns: &dyn RemoteNamespace) -> FsResult<Option<&CursorEntry>> {
        self.fill_to(ns, self.pos)?;
        Ok(self.entries.get(self.pos))
    }

    /// The next entry, or `None` at end of stream.
    pub fn next_entry(&mut self, ns: &dyn RemoteNamespace) -> FsResult<Option<CursorEntry>> {
        self.fill_to(ns, self.pos)?;
        let entry = self.entries.get(self.pos).cloned();
        if entry.is_some() {
            self.pos += 1;
        }
        Ok(entry)
    }

    /// Step past the entry [`peek`](Self::peek) returned.
    pub fn advance(&mut self) {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
    }

    fn token_at(&self, pos: usize) -> u64 {
        (u64::from(self.id) << 32) | (pos as u64 & 0xffff_ffff)
    }

    /// Opaque token for the current position.
    pub fn tell(&self) -> u64 {
        self.token_at(self.pos)
    }

    /// Return to the position `token` was taken at.
    pub fn seek(&mut self, token: u64) -> FsResult<()> {
        let owner = (token >> 32) as u32;
        if owner != self.id {
            return Err(FsError::invalid(format!(
                "token {token:#x} belongs to cursor {owner}, not {}",
                self.id
            )));
        }
        self.pos = (token & 0xffff_ffff) as usize;
        Ok(())
    }

    /// Back to before `.`, refetching children on the way forward.
    pub fn rewind(&mut self) {
        self.entries.truncate(2);
        self.complete = false;
        self.pos = 0;
    }

    /// Write whole dirent records into `buf`, advancing past each.
    ///
    /// Fails `OutOfRange` without moving if `buf` cannot hold one record.
    /// Returns 0 at end of stream. An entry that cannot be encoded stops the
    /// batch before it; the error is raised once it is the first entry.
    pub fn getdents(&mut self, ns: &dyn RemoteNamespace, buf: &mut [u8]) -> FsResult<usize> {
        if buf.len() < DIRENT_RECORD_SIZE {
            return Err(FsError::out_of_range(format!(
                "getdents needs at least {DIRENT_RECORD_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let mut written = 0;
        while written + DIRENT_RECORD_SIZE <= buf.len() {
            match self.encode_current(ns, &mut buf[written..]) {
                Ok(true) => {
                    written += DIRENT_RECORD_SIZE;
                    self.pos += 1;
                }
                Ok(false) => break,
                Err(e) if written > 0 => {
                    tracing::debug!(dir = %self.dir, error = %e, "getdents stopped short");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Encode the entry at the current position; false at end of stream.
    fn encode_current(&mut self, ns: &dyn RemoteNamespace, buf: &mut [u8]) -> FsResult<bool> {
        let next = self.token_at(self.pos + 1);
        let Some(current) = self.peek(ns)? else {
            return Ok(false);
        };
        current.entry.to_record(next)?.encode(buf)?;
        Ok(true)
    }

    /// Write whole NUL-terminated names into `buf`, advancing past each.
    ///
    /// Fails `OutOfRange` without moving if the first name does not fit.
    /// Returns 0 at end of stream.
    pub fn getdnames(&mut self, ns: &dyn RemoteNamespace, buf: &mut [u8]) -> FsResult<usize> {
        let mut written = 0;
        while let Some(current) = self.peek(ns)? {
            let name = current.entry.name.as_bytes();
            let need = name.len() + 1;
            if written + need > buf.len() {
                if written == 0 {
                    return Err(FsError::out_of_range(format!(
                        "name needs {need} bytes, buffer holds {}",
                        buf.len()
                    )));
                }
                break;
            }
            buf[written..written + name.len()].copy_from_slice(name);
            buf[written + name.len()] = 0;
            written += need;
            self.pos += 1;
        }
        Ok(written)
    }
}

/// Open cursors for one mount.
#[derive(Debug)]
pub struct DirTable {
    dirs: DashMap<u32, Arc<Mutex<DirStream>>>,
    next: AtomicU32,
}

impl Default for DirTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DirTable {
    pub fn new() -> Self {
        Self {
            dirs: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }

    /// Reserve an id for a cursor about to be built.
    pub fn next_id(&self) -> FsResult<u32> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map_err(|_| FsError::OutOfMemory("directory cursor ids exhausted".to_string()))
    }

    pub fn insert(&self, stream: DirStream) -> DirId {
        let id = stream.id();
        self.dirs.insert(id, Arc::new(Mutex::new(stream)));
        DirId::from_raw(id)
    }

    pub fn get(&self, dir: DirId) -> FsResult<Arc<Mutex<DirStream>>> {
        self.dirs
            .get(&dir.as_raw())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FsError::bad_descriptor(format!("dir {dir}")))
    }

    pub fn remove(&self, dir: DirId) -> FsResult<()> {
        self.dirs
            .remove(&dir.as_raw())
            .map(|_| ())
            .ok_or_else(|| FsError::bad_descriptor(format!("dir {dir}")))
    }

    /// Drop every cursor, returning how many were open.
    pub fn clear(&self) -> usize {
        let count = self.dirs.len();
        self.dirs.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::MemoryNamespace;
    use remotefs_types::{Credentials, DirentRecord, FileLayout, FsErrorKind, NAME_MAX};

    fn populated(n: usize) -> (MemoryNamespace, FileAttr) {
        let ns = MemoryNamespace::new();
        let d = ns.mkdir(ns.root(), "d", 0o755, Credentials::default()).unwrap();
        for i in 0..n {
            ns.create(
                d.ino,
                &format!("f{i:03}"),
                0o644,
                Credentials::default(),
                &FileLayout::default(),
            )
            .unwrap();
        }
        (ns, d)
    }

    fn stream(ns: &MemoryNamespace, d: &FileAttr, id: u32, batch: usize) -> DirStream {
        let root = ns.getattr(ns.root()).unwrap();
        DirStream::new(id, d, &root, batch)
    }

    fn drain(ns: &MemoryNamespace, s: &mut DirStream) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(e) = s.next_entry(ns).unwrap() {
            names.push(e.entry.name);
        }
        names
    }

    #[test]
    fn test_sequence_across_batches() {
        let (ns, d) = populated(10);
        let mut s = stream(&ns, &d, 1, 3);
        let names = drain(&ns, &mut s);
        assert_eq!(names.len(), 12);
        assert_eq!(names[0], ".");
        assert_eq!(names[1], "..");
        assert_eq!(names[2], "f000");
        assert_eq!(names[11], "f009");
        assert!(s.next_entry(&ns).unwrap().is_none());
    }

    #[test]
    fn test_tell_seek() {
        let (ns, d) = populated(5);
        let mut s = stream(&ns, &d, 7, 2);
        s.next_entry(&ns).unwrap();
        s.next_entry(&ns).unwrap();
        s.next_entry(&ns).unwrap();
        let token = s.tell();
        let expected = s.next_entry(&ns).unwrap().unwrap();
        s.next_entry(&ns).unwrap();
        s.seek(token).unwrap();
        assert_eq!(s.next_entry(&ns).unwrap().unwrap(), expected);

        let other = stream(&ns, &d, 8, 2);
        let err = s.seek(other.tell()).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
    }

    #[test]
    fn test_rewind_sees_new_children() {
        let (ns, d) = populated(1);
        let mut s = stream(&ns, &d, 1, 8);
        assert_eq!(drain(&ns, &mut s).len(), 3);
        ns.create(d.ino, "zz", 0o644, Credentials::default(), &FileLayout::default())
            .unwrap();
        s.rewind();
        assert_eq!(drain(&ns, &mut s), [".", "..", "f000", "zz"]);
    }

    #[test]
    fn test_getdents_chunks_match_readdir() {
        let (ns, d) = populated(7);
        let expected = drain(&ns, &mut stream(&ns, &d, 1, 4));

        let mut s = stream(&ns, &d, 2, 4);
        let mut buf = vec![0u8; DIRENT_RECORD_SIZE * 3 + 17];
        let mut names = Vec::new();
        loop {
            let n = s.getdents(&ns, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert_eq!(n % DIRENT_RECORD_SIZE, 0);
            for rec in DirentRecord::decode_all(&buf[..n]).unwrap() {
                names.push(rec.name);
            }
        }
        assert_eq!(names, expected);
    }

    #[test]
    fn test_getdents_offsets_are_seekable() {
        let (ns, d) = populated(3);
        let mut s = stream(&ns, &d, 4, 8);
        let mut buf = vec![0u8; DIRENT_RECORD_SIZE * 2];
        let n = s.getdents(&ns, &mut buf).unwrap();
        let recs = DirentRecord::decode_all(&buf[..n]).unwrap();
        assert_eq!(recs[0].name, ".");
        assert_eq!(recs[0].ino, d.ino.get());

        // d_off of the first record positions at the second.
        s.seek(recs[0].off).unwrap();
        assert_eq!(s.next_entry(&ns).unwrap().unwrap().entry.name, "..");
    }

    #[test]
    fn test_getdents_small_buffer_does_not_advance() {
        let (ns, d) = populated(1);
        let mut s = stream(&ns, &d, 1, 8);
        let before = s.tell();
        let mut buf = vec![0u8; DIRENT_RECORD_SIZE - 1];
        let err = s.getdents(&ns, &mut buf).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::OutOfRange);
        assert_eq!(s.tell(), before);
    }

    #[test]
    fn test_getdents_keeps_records_before_a_bad_name() {
        let (ns, d) = populated(1);
        let mut s = stream(&ns, &d, 1, 8);
        s.fill_to(&ns, 8).unwrap();
        // A listing from a namespace that allows longer names than a record holds.
        s.entries.push(CursorEntry {
            entry: DirEntry::new("x".repeat(NAME_MAX + 1), InodeId(99), FileType::File),
            attr: None,
        });

        let mut buf = vec![0u8; DIRENT_RECORD_SIZE * 8];
        let n = s.getdents(&ns, &mut buf).unwrap();
        let names: Vec<_> = DirentRecord::decode_all(&buf[..n])
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, [".", "..", "f000"]);

        // The bad entry is next; it is reported and not skipped.
        let err = s.getdents(&ns, &mut buf).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
        assert_eq!(s.next_entry(&ns).unwrap().unwrap().entry.ino, InodeId(99));
    }

    #[test]
    fn test_getdnames() {
        let (ns, d) = populated(0);
        let mut buf = [0u8; 100];
        let mut s = stream(&ns, &d, 1, 8);
        assert_eq!(s.getdnames(&ns, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b".\0..\0");
        assert_eq!(s.getdnames(&ns, &mut buf).unwrap(), 0);

        ns.create(d.ino, "foo", 0o777, Credentials::default(), &FileLayout::default())
            .unwrap();
        let mut s = stream(&ns, &d, 2, 8);
        assert_eq!(s.getdnames(&ns, &mut buf).unwrap(), 9);

        let mut s = stream(&ns, &d, 3, 8);
        let err = s.getdnames(&ns, &mut buf[..1]).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::OutOfRange);

        let mut s = stream(&ns, &d, 4, 8);
        assert_eq!(s.getdnames(&ns, &mut buf[..6]).unwrap(), 5);
        assert_eq!(s.getdnames(&ns, &mut buf[..6]).unwrap(), 4);
        assert_eq!(&buf[..4], b"foo\0");
    }

    #[test]
    fn test_table() {
        let table = DirTable::new();
        let (ns, d) = populated(0);
        let id = table.next_id().unwrap();
        let dir = table.insert(stream(&ns, &d, id, 8));
        assert_eq!(dir.as_raw(), 1);
        assert!(table.get(dir).is_ok());
        table.remove(dir).unwrap();
        assert_eq!(table.get(dir).unwrap_err().kind(), FsErrorKind::BadDescriptor);
        assert!(table.is_empty());
    }
}

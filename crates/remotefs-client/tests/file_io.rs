//! Descriptors: open flags, permissions at open, data transfer, seeking,
//! layouts and attribute changes through a handle.

mod common;

use std::time::{Duration, UNIX_EPOCH};

use common::{CleanRoom, touch};
use remotefs_client::{Fd, FileLayout, FsErrorKind, OpenFlags, SetAttr, Stat, Whence};

const BYTES: &[u8] = b"foobarbaz";

fn rdwr_create() -> OpenFlags {
    OpenFlags::CREAT | OpenFlags::RDWR
}

// ============================================================================
// Permissions
// ============================================================================

#[test]
fn double_chmod() {
    let room = CleanRoom::new("double_chmod");
    let ctx = &room.ctx;
    let file = "test_perms";

    let fd = ctx.open(file, rdwr_create(), 0o666).unwrap();
    assert_eq!(ctx.write(fd, BYTES, 0).unwrap(), BYTES.len());
    ctx.close(fd).unwrap();

    ctx.chmod(file, 0o400).unwrap();
    let err = ctx.open(file, OpenFlags::RDWR, 0).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::PermissionDenied);
    assert_eq!(err.errno(), 13);

    let fd = ctx.open(file, OpenFlags::RDONLY, 0).unwrap();
    let mut buf = [0u8; 100];
    let n = ctx.read(fd, &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], BYTES);
    let err = ctx.write(fd, BYTES, 0).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::BadDescriptor);
    assert_eq!(err.errno(), 9);
    ctx.close(fd).unwrap();

    ctx.chmod(file, 0o600).unwrap();
    assert_eq!(ctx.lstat(file).unwrap().mode, 0o100600);

    let fd = ctx.open(file, OpenFlags::RDWR, 0).unwrap();
    assert_eq!(ctx.write(fd, BYTES, 0).unwrap(), BYTES.len());
    ctx.close(fd).unwrap();
}

#[test]
fn fchmod_keeps_open_handle_writable() {
    let room = CleanRoom::new("fchmod");
    let ctx = &room.ctx;
    let file = "test_perms";

    let fd = ctx.open(file, rdwr_create(), 0o666).unwrap();
    assert_eq!(ctx.write(fd, BYTES, 0).unwrap(), BYTES.len());
    ctx.fchmod(fd, 0o400).unwrap();

    let mut buf = [0u8; 100];
    let n = ctx.read(fd, &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], BYTES);
    assert_eq!(ctx.write(fd, BYTES, 0).unwrap(), BYTES.len());
    ctx.close(fd).unwrap();

    assert_eq!(
        ctx.open(file, OpenFlags::RDWR, 0).unwrap_err().kind(),
        FsErrorKind::PermissionDenied
    );

    ctx.chmod(file, 0o600).unwrap();
    let fd = ctx.open(file, OpenFlags::RDWR, 0).unwrap();
    assert_eq!(ctx.write(fd, BYTES, 0).unwrap(), BYTES.len());
    ctx.close(fd).unwrap();
}

#[test]
fn fchown_to_nobody_denies_owner_access() {
    let room = CleanRoom::new("fchown");
    let ctx = &room.ctx;
    let file = "test_fchown";

    let fd = ctx.open(file, rdwr_create(), 0o666).unwrap();
    ctx.fchmod(fd, 0o600).unwrap();
    ctx.fchown(fd, 65534, 65534).unwrap();
    ctx.close(fd).unwrap();

    let st = ctx.stat(file).unwrap();
    assert_eq!((st.uid, st.gid), (65534, 65534));
    assert_eq!(
        ctx.open(file, OpenFlags::RDWR, 0).unwrap_err().kind(),
        FsErrorKind::PermissionDenied
    );
}

#[test]
fn search_permission_gates_traversal() {
    let room = CleanRoom::new("search_perm");
    let ctx = &room.ctx;
    ctx.mkdir("d", 0o755).unwrap();
    touch(ctx, "d/f", 0o644);

    ctx.chmod("d", 0o600).unwrap();
    assert_eq!(ctx.stat("d/f").unwrap_err().kind(), FsErrorKind::PermissionDenied);
    assert_eq!(ctx.chdir("d").unwrap_err().kind(), FsErrorKind::PermissionDenied);
    // The directory itself is still reachable.
    assert!(ctx.stat("d").unwrap().is_dir());

    ctx.chmod("d", 0o500).unwrap();
    assert!(ctx.stat("d/f").unwrap().is_file());
    assert_eq!(
        ctx.unlink("d/f").unwrap_err().kind(),
        FsErrorKind::PermissionDenied
    );
    assert_eq!(
        ctx.open("d/new", rdwr_create(), 0o644).unwrap_err().kind(),
        FsErrorKind::PermissionDenied
    );
}

// ============================================================================
// Open flags
// ============================================================================

#[test]
fn open_flag_combinations() {
    let room = CleanRoom::new("open_flags");
    let ctx = &room.ctx;

    assert_eq!(
        ctx.open("f", OpenFlags::RDWR | OpenFlags::WRONLY | OpenFlags::CREAT, 0o644)
            .unwrap_err()
            .kind(),
        FsErrorKind::InvalidArgument
    );
    assert_eq!(
        ctx.open("missing", OpenFlags::RDONLY, 0).unwrap_err().kind(),
        FsErrorKind::NotFound
    );

    let fd = ctx
        .open("f", OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRONLY, 0o644)
        .unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(
        ctx.read(fd, &mut buf, 0).unwrap_err().kind(),
        FsErrorKind::BadDescriptor
    );
    ctx.write(fd, BYTES, -1).unwrap();
    ctx.close(fd).unwrap();

    assert_eq!(
        ctx.open("f", OpenFlags::CREAT | OpenFlags::EXCL, 0o644)
            .unwrap_err()
            .kind(),
        FsErrorKind::AlreadyExists
    );

    // TRUNC empties an existing file.
    let fd = ctx
        .open("f", OpenFlags::TRUNC | OpenFlags::WRONLY, 0)
        .unwrap();
    assert_eq!(ctx.fstat(fd).unwrap().size, 0);
    ctx.close(fd).unwrap();

    ctx.mkdir("d", 0o755).unwrap();
    assert_eq!(
        ctx.open("d", OpenFlags::WRONLY, 0).unwrap_err().kind(),
        FsErrorKind::IsADirectory
    );
    let fd = ctx.open("d", OpenFlags::RDONLY, 0).unwrap();
    assert!(ctx.fstat(fd).unwrap().is_dir());
    ctx.close(fd).unwrap();

    assert_eq!(
        OpenFlags::from_raw(1 << 20).unwrap_err().kind(),
        FsErrorKind::InvalidArgument
    );
}

#[test]
fn create_masks_mode_and_sets_owner() {
    let room = CleanRoom::new("create_mode");
    let ctx = &room.ctx;
    let fd = ctx.open("f", OpenFlags::CREAT, 0o100644).unwrap();
    ctx.close(fd).unwrap();
    let st = ctx.stat("f").unwrap();
    assert_eq!(st.mode, 0o100644);
    assert_eq!(st.nlink, 1);
    assert_eq!((st.uid, st.gid), (0, 0));
}

#[test]
fn trailing_slash_names_a_directory() {
    let room = CleanRoom::new("trailing_slash");
    let ctx = &room.ctx;
    touch(ctx, "f", 0o644);
    ctx.mkdir("d", 0o755).unwrap();

    assert_eq!(ctx.stat("f/").unwrap_err().kind(), FsErrorKind::NotADirectory);
    assert_eq!(
        ctx.open("f/", OpenFlags::RDONLY, 0).unwrap_err().kind(),
        FsErrorKind::NotADirectory
    );
    assert_eq!(ctx.unlink("f/").unwrap_err().kind(), FsErrorKind::NotADirectory);
    assert!(ctx.stat("d/").unwrap().is_dir());

    // Creating a file under a directory-style name fails and leaves nothing.
    assert_eq!(
        ctx.open("g/", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644)
            .unwrap_err()
            .kind(),
        FsErrorKind::IsADirectory
    );
    assert_eq!(ctx.stat("g").unwrap_err().kind(), FsErrorKind::NotFound);

    // mkdir accepts the slash.
    ctx.mkdir("h/", 0o755).unwrap();
    assert!(ctx.stat("h").unwrap().is_dir());
}

// ============================================================================
// Data transfer
// ============================================================================

#[test]
fn implicit_cursor_and_lseek() {
    let room = CleanRoom::new("cursor");
    let ctx = &room.ctx;
    let fd = ctx.open("f", rdwr_create(), 0o644).unwrap();

    assert_eq!(ctx.write(fd, b"hello ", -1).unwrap(), 6);
    assert_eq!(ctx.write(fd, b"world", -1).unwrap(), 5);
    assert_eq!(ctx.lseek(fd, 0, Whence::Cur).unwrap(), 11);

    // Explicit offsets leave the cursor alone.
    let mut buf = [0u8; 5];
    assert_eq!(ctx.read(fd, &mut buf, 0).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(ctx.lseek(fd, 0, Whence::Cur).unwrap(), 11);

    assert_eq!(ctx.lseek(fd, 6, Whence::Set).unwrap(), 6);
    assert_eq!(ctx.read(fd, &mut buf, -1).unwrap(), 5);
    assert_eq!(&buf, b"world");
    assert_eq!(ctx.read(fd, &mut buf, -1).unwrap(), 0);

    assert_eq!(ctx.lseek(fd, -5, Whence::End).unwrap(), 6);
    assert_eq!(
        ctx.lseek(fd, -12, Whence::End).unwrap_err().kind(),
        FsErrorKind::InvalidArgument
    );
    assert_eq!(
        ctx.read(fd, &mut buf, -2).unwrap_err().kind(),
        FsErrorKind::InvalidArgument
    );

    // Seeking past the end and writing leaves a zero-filled hole.
    ctx.lseek(fd, 2, Whence::End).unwrap();
    ctx.write(fd, b"!", -1).unwrap();
    let mut all = [0xffu8; 16];
    let n = ctx.read(fd, &mut all, 0).unwrap();
    assert_eq!(&all[..n], b"hello world\0\0!");
    ctx.close(fd).unwrap();
}

#[test]
fn append_writes_at_end() {
    let room = CleanRoom::new("append");
    let ctx = &room.ctx;
    let fd = ctx.open("f", rdwr_create(), 0o644).unwrap();
    ctx.write(fd, b"abc", 0).unwrap();
    ctx.close(fd).unwrap();

    let fd = ctx
        .open("f", OpenFlags::APPEND | OpenFlags::WRONLY, 0)
        .unwrap();
    ctx.write(fd, b"def", -1).unwrap();
    // An explicit offset is honored even in append mode.
    ctx.write(fd, b"X", 0).unwrap();
    ctx.write(fd, b"g", -1).unwrap();
    ctx.close(fd).unwrap();

    let fd = ctx.open("f", OpenFlags::RDONLY, 0).unwrap();
    let mut buf = [0u8; 16];
    let n = ctx.read(fd, &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"Xbcdefg");
    ctx.close(fd).unwrap();
}

#[test]
fn read_empty_file() {
    let room = CleanRoom::new("read_empty");
    let ctx = &room.ctx;
    let fd = ctx
        .open(
            "empty",
            OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::WRONLY,
            0o644,
        )
        .unwrap();
    ctx.close(fd).unwrap();

    let fd = ctx.open("empty", OpenFlags::RDONLY, 0).unwrap();
    let mut buf = [0u8; 4096];
    assert_eq!(ctx.read(fd, &mut buf, 0).unwrap(), 0);
    assert_eq!(ctx.read(fd, &mut buf, 100).unwrap(), 0);
    ctx.close(fd).unwrap();
}

#[test]
fn truncate_and_ftruncate() {
    let room = CleanRoom::new("truncate");
    let ctx = &room.ctx;
    let fd = ctx.open("f", rdwr_create(), 0o644).unwrap();
    ctx.write(fd, BYTES, 0).unwrap();

    ctx.ftruncate(fd, 3).unwrap();
    assert_eq!(ctx.fstat(fd).unwrap().size, 3);
    ctx.truncate("f", 10).unwrap();
    let mut buf = [0xffu8; 16];
    let n = ctx.read(fd, &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"foo\0\0\0\0\0\0\0");
    ctx.fsync(fd, false).unwrap();
    ctx.fsync(fd, true).unwrap();
    ctx.close(fd).unwrap();

    let fd = ctx.open("f", OpenFlags::RDONLY, 0).unwrap();
    assert_eq!(
        ctx.ftruncate(fd, 0).unwrap_err().kind(),
        FsErrorKind::BadDescriptor
    );
    ctx.close(fd).unwrap();

    ctx.mkdir("d", 0o755).unwrap();
    assert_eq!(ctx.truncate("d", 0).unwrap_err().kind(), FsErrorKind::IsADirectory);
    ctx.sync_fs().unwrap();
}

#[test]
fn huge_offsets_fail_only_the_call() {
    let room = CleanRoom::new("huge_offsets");
    let ctx = &room.ctx;
    let fd = ctx.open("f", rdwr_create(), 0o644).unwrap();
    ctx.write(fd, BYTES, 0).unwrap();
    let huge = u64::MAX / 2 + 7;

    let err = ctx.write(fd, b"x", 1 << 62).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::OutOfMemory);
    assert_eq!(err.errno(), 12);
    assert_eq!(
        ctx.ftruncate(fd, huge).unwrap_err().kind(),
        FsErrorKind::OutOfMemory
    );
    assert_eq!(
        ctx.truncate("f", 1 << 62).unwrap_err().kind(),
        FsErrorKind::OutOfMemory
    );
    assert_eq!(
        ctx.setattr("f", &SetAttr::new().with_size(huge))
            .unwrap_err()
            .kind(),
        FsErrorKind::OutOfMemory
    );

    // The file and the descriptor are untouched.
    assert_eq!(ctx.fstat(fd).unwrap().size, BYTES.len() as u64);
    let mut buf = [0u8; 16];
    let n = ctx.read(fd, &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], BYTES);
    ctx.close(fd).unwrap();
}

#[test]
fn bad_file_descriptor() {
    let room = CleanRoom::new("bad_file_desc");
    let ctx = &room.ctx;
    let fd = Fd::from_raw(-1);
    let mut buf = [0u8; 0];

    let errors = [
        ctx.fchmod(fd, 0o655).unwrap_err(),
        ctx.close(fd).unwrap_err(),
        ctx.lseek(fd, 0, Whence::Set).unwrap_err(),
        ctx.read(fd, &mut buf, 0).unwrap_err(),
        ctx.write(fd, &buf, 0).unwrap_err(),
        ctx.ftruncate(fd, 0).unwrap_err(),
        ctx.fsync(fd, false).unwrap_err(),
        ctx.fstat(fd).unwrap_err(),
        ctx.get_file_stripe_unit(fd).unwrap_err(),
        ctx.get_file_pool_name(fd).unwrap_err(),
        ctx.get_file_replication(fd).unwrap_err(),
        ctx.get_file_layout(fd).unwrap_err(),
    ];
    for err in errors {
        assert_eq!(err.kind(), FsErrorKind::BadDescriptor, "{err}");
        assert_eq!(err.errno(), 9);
    }

    // A closed descriptor is gone for good.
    let fd = ctx.open("f", rdwr_create(), 0o644).unwrap();
    ctx.close(fd).unwrap();
    assert_eq!(ctx.fstat(fd).unwrap_err().kind(), FsErrorKind::BadDescriptor);
}

// ============================================================================
// Layouts
// ============================================================================

#[test]
fn open_layout() {
    let room = CleanRoom::new("open_layout");
    let ctx = &room.ctx;

    let layout = FileLayout::new(1 << 20, 7, 1 << 20, "data");
    let fd = ctx
        .open_layout("test_layout_b", OpenFlags::CREAT, 0o666, &layout)
        .unwrap();
    assert!(fd.as_raw() > 0);
    assert_eq!(ctx.get_file_stripe_unit(fd).unwrap(), 1 << 20);
    assert_eq!(ctx.get_file_layout(fd).unwrap().stripe_count, 7);
    assert_eq!(ctx.get_file_pool_name(fd).unwrap(), "data");
    assert_eq!(ctx.get_file_replication(fd).unwrap(), 3);
    assert_eq!(ctx.fstat(fd).unwrap().blksize, 1 << 20);
    ctx.close(fd).unwrap();

    let bad = FileLayout::new(1 << 20, 1, 19, "data");
    let err = ctx
        .open_layout("test_layout_c", OpenFlags::CREAT, 0o666, &bad)
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
    assert_eq!(err.errno(), 22);
    assert_eq!(
        ctx.stat("test_layout_c").unwrap_err().kind(),
        FsErrorKind::NotFound
    );
}

#[test]
fn default_layout_comes_from_config() {
    let ns = std::sync::Arc::new(remotefs_client::MemoryNamespace::new().with_pool("fast", 2));
    let mut room = CleanRoom::on(ns, "default_layout");
    room.ctx.conf_set("client_default_pool", "fast").unwrap();
    room.ctx
        .conf_set("client_default_stripe_unit", "65536")
        .unwrap();
    room.ctx
        .conf_set("client_default_object_size", "65536")
        .unwrap();
    room.remount(false);

    let fd = room.ctx.open("f", rdwr_create(), 0o644).unwrap();
    assert_eq!(room.ctx.get_file_pool_name(fd).unwrap(), "fast");
    assert_eq!(room.ctx.get_file_replication(fd).unwrap(), 2);
    assert_eq!(room.ctx.get_file_stripe_unit(fd).unwrap(), 65536);
    room.ctx.close(fd).unwrap();
}

// ============================================================================
// Attributes
// ============================================================================

#[test]
fn setattr_by_mask() {
    let room = CleanRoom::new("setattr_mask");
    let ctx = &room.ctx;
    touch(ctx, "f", 0o644);

    let when = UNIX_EPOCH + Duration::from_secs(1_000_000);
    ctx.utime("f", when, when).unwrap();
    let st = ctx.stat("f").unwrap();
    assert_eq!(st.m_time, 1_000_000_000);
    assert_eq!(st.a_time, 1_000_000_000);

    // Only MODE (1) is applied; the uid in the record is ignored.
    let wanted = Stat {
        mode: 0o600,
        uid: 99,
        ..Stat::default()
    };
    let st = ctx.setattr_raw("f", &wanted, 1).unwrap();
    assert_eq!(st.mode, 0o100600);
    assert_eq!(st.uid, 0);

    ctx.chown("f", 5, 6).unwrap();
    let st = ctx.stat("f").unwrap();
    assert_eq!((st.uid, st.gid), (5, 6));

    assert_eq!(
        ctx.setattr_raw("f", &wanted, 1 << 9).unwrap_err().kind(),
        FsErrorKind::InvalidArgument
    );

    // Growing through setattr needs write permission; uid 0 lost ownership.
    assert_eq!(
        ctx.setattr("f", &SetAttr::new().with_size(10))
            .unwrap_err()
            .kind(),
        FsErrorKind::PermissionDenied
    );
}

#[test]
fn statfs_counts_objects() {
    let room = CleanRoom::new("statfs");
    let ctx = &room.ctx;
    let before = ctx.statfs("/").unwrap();
    touch(ctx, "f", 0o644);
    let after = ctx.statfs("/").unwrap();
    assert_eq!(after.namemax, 255);
    assert_eq!(after.ffree + 1, before.ffree);
    assert_eq!(
        ctx.statfs("/missing").unwrap_err().kind(),
        FsErrorKind::NotFound
    );
}

// ============================================================================
// Namespace edits
// ============================================================================

#[test]
fn rename_and_unlink() {
    let room = CleanRoom::new("rename");
    let ctx = &room.ctx;
    ctx.mkdirs("a/b", 0o755).unwrap();
    touch(ctx, "a/f", 0o644);

    ctx.rename("a/f", "a/b/g").unwrap();
    assert_eq!(ctx.stat("a/f").unwrap_err().kind(), FsErrorKind::NotFound);
    assert!(ctx.stat("a/b/g").unwrap().is_file());

    assert_eq!(
        ctx.rename("a", "a/b/inside").unwrap_err().kind(),
        FsErrorKind::InvalidArgument
    );
    assert_eq!(ctx.rmdir("a/b").unwrap_err().kind(), FsErrorKind::DirectoryNotEmpty);
    assert_eq!(ctx.unlink("a/b").unwrap_err().kind(), FsErrorKind::IsADirectory);
    assert_eq!(ctx.rmdir("a/b/g").unwrap_err().kind(), FsErrorKind::NotADirectory);
    assert_eq!(
        ctx.mkdir("a", 0o755).unwrap_err().kind(),
        FsErrorKind::AlreadyExists
    );
    assert_eq!(ctx.mkdir("/", 0o755).unwrap_err().kind(), FsErrorKind::InvalidArgument);

    ctx.unlink("a/b/g").unwrap();
    ctx.rmdir("a/b").unwrap();
    ctx.rmdir("a").unwrap();
}

#[test]
fn descriptor_to_unlinked_file_goes_stale() {
    let room = CleanRoom::new("unlink_open");
    let ctx = &room.ctx;
    let fd = ctx.open("f", rdwr_create(), 0o644).unwrap();
    ctx.write(fd, BYTES, 0).unwrap();
    ctx.unlink("f").unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(
        ctx.read(fd, &mut buf, 0).unwrap_err().kind(),
        FsErrorKind::NotFound
    );
    // The descriptor itself is still valid until closed.
    ctx.close(fd).unwrap();
}

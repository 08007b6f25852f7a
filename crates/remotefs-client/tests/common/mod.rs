//! Shared setup for the integration tests.
//!
//! Each test gets a clean-room directory named after itself, created on a
//! fresh namespace and then mounted as the root of a new context, so paths
//! in tests never see each other's files.

#![allow(dead_code)]

use std::sync::Arc;

use remotefs_client::{MemoryNamespace, MountContext};

/// Route `tracing` output through the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A configured but unmounted context.
pub fn configured(ns: &Arc<MemoryNamespace>) -> MountContext {
    init_tracing();
    let ctx = MountContext::new(ns.clone());
    ctx.conf_read_file(None).unwrap();
    ctx
}

/// A context mounted at a fresh `/<name>` directory.
pub struct CleanRoom {
    pub ns: Arc<MemoryNamespace>,
    pub ctx: MountContext,
    pub root: String,
}

impl CleanRoom {
    pub fn new(name: &str) -> Self {
        Self::on(Arc::new(MemoryNamespace::new()), name)
    }

    pub fn on(ns: Arc<MemoryNamespace>, name: &str) -> Self {
        let root = format!("/{name}");
        let setup = configured(&ns);
        setup.mount(Some("/")).unwrap();
        if setup.stat(&root).is_err() {
            setup.mkdir(&root, 0o700).unwrap();
        }
        setup.unmount().unwrap();
        setup.release().unwrap();

        let ctx = configured(&ns);
        ctx.conf_set("admin_socket", &format!("/tmp/{name}")).unwrap();
        ctx.mount(Some(&root)).unwrap();
        Self { ns, ctx, root }
    }

    /// Unmount and mount again, optionally on a brand new context.
    pub fn remount(&mut self, deep: bool) {
        self.ctx.unmount().unwrap();
        if deep {
            self.ctx.release().unwrap();
            self.ctx = configured(&self.ns);
        }
        self.ctx.mount(Some(&self.root)).unwrap();
    }
}

/// Create `path` as an empty file and close it.
pub fn touch(ctx: &MountContext, path: &str, mode: u32) {
    let fd = ctx
        .open(path, remotefs_client::OpenFlags::CREAT, mode)
        .unwrap();
    ctx.close(fd).unwrap();
}

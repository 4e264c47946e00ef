//! Lifecycle tests against the file-backed backend.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use stratum::backend::{
    Backend, BackendError, BackendErrorKind, BackendResult, DatasetEntry, DestroyFlags,
    FakeBackend,
};
use stratum::naming::anchor_of;
use stratum::{
    BackendKind, CancellationToken, LayerKind, OpContext, Snapshotter, SnapshotterConfig,
};
use stratum_common::{ErrorKind, StratumPaths};
use tempfile::{TempDir, tempdir};

const MIB: usize = 1024 * 1024;

fn snapshotter() -> (TempDir, Snapshotter) {
    let temp = tempdir().unwrap();
    let config = SnapshotterConfig::default()
        .with_root(temp.path())
        .with_backend(BackendKind::Fake);
    let snapshotter = Snapshotter::open(&config).unwrap();
    (temp, snapshotter)
}

fn ctx() -> OpContext {
    OpContext::background()
}

/// Prepare `build` on top of `parent`, write `bytes` into it, commit it as `name`.
fn commit_layer(s: &Snapshotter, name: &str, parent: Option<&str>, bytes: usize) {
    let build = format!("{name}-build");
    let mount = s.prepare(&ctx(), &build, parent).unwrap();
    if bytes > 0 {
        fs::write(mount.path.join(format!("{name}.bin")), vec![0x5a; bytes]).unwrap();
    }
    s.commit(&ctx(), name, &build).unwrap();
}

#[test_log::test]
fn prepare_twice_fails() {
    let (_temp, s) = snapshotter();
    s.prepare(&ctx(), "k", None).unwrap();
    let err = s.prepare(&ctx(), "k", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn prepare_returns_writable_mount() {
    let (temp, s) = snapshotter();
    let mount = s.prepare(&ctx(), "default/1", None).unwrap();

    let expected = StratumPaths::with_root(temp.path()).layer_dir("active", "default.2f1");
    assert_eq!(mount.path, expected);
    assert!(mount.path.is_dir());
    assert!(!mount.readonly);
    assert_eq!(mount.fs_type, "bind");
    assert!(mount.options.contains(&"rw".to_string()));
}

#[test]
fn roots_are_independent() {
    let (_temp, s) = snapshotter();
    s.prepare(&ctx(), "one", None).unwrap();
    s.prepare(&ctx(), "two", None).unwrap();
    assert_eq!(s.walk(&ctx()).unwrap().count(), 2);
}

#[test]
fn view_is_read_only_and_not_committable() {
    let (_temp, s) = snapshotter();
    commit_layer(&s, "base", None, 10);

    let mount = s.view(&ctx(), "inspect", Some("base")).unwrap();
    assert!(mount.readonly);
    assert!(mount.options.contains(&"ro".to_string()));
    assert_eq!(fs::read(mount.path.join("base.bin")).unwrap(), vec![0x5a; 10]);

    let err = s.commit(&ctx(), "frozen", "inspect").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(s.stat(&ctx(), "inspect").unwrap().kind, LayerKind::View);
}

#[test]
fn commit_errors() {
    let (_temp, s) = snapshotter();
    let err = s.commit(&ctx(), "target", "missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    commit_layer(&s, "taken", None, 0);
    s.prepare(&ctx(), "work", None).unwrap();
    let err = s.commit(&ctx(), "taken", "work").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let err = s.commit(&ctx(), "work", "work").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    // The failed attempts left the source untouched
    assert_eq!(s.stat(&ctx(), "work").unwrap().kind, LayerKind::Active);
    s.commit(&ctx(), "done", "work").unwrap();
}

#[test]
fn double_commit_is_invalid_state() {
    let (_temp, s) = snapshotter();
    s.prepare(&ctx(), "k", None).unwrap();
    s.commit(&ctx(), "c1", "k").unwrap();

    let err = s.commit(&ctx(), "c2", "k").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = s.commit(&ctx(), "c3", "c1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn removing_the_target_forgets_the_commit() {
    let (_temp, s) = snapshotter();
    s.prepare(&ctx(), "extract", None).unwrap();
    s.commit(&ctx(), "layer", "extract").unwrap();
    s.remove(&ctx(), "layer").unwrap();

    let err = s.commit(&ctx(), "again", "extract").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn reused_key_can_be_committed_again() {
    let (_temp, s) = snapshotter();
    s.prepare(&ctx(), "k", None).unwrap();
    s.commit(&ctx(), "c1", "k").unwrap();
    s.prepare(&ctx(), "k", None).unwrap();
    s.commit(&ctx(), "c2", "k").unwrap();
}

#[test]
fn parent_must_be_committed() {
    let (_temp, s) = snapshotter();
    let err = s.prepare(&ctx(), "child", Some("nope")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    s.prepare(&ctx(), "active-parent", None).unwrap();
    let err = s.prepare(&ctx(), "child", Some("active-parent")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Nothing was left behind
    assert!(s.stat(&ctx(), "child").is_err());
}

#[test]
fn invalid_keys_are_rejected() {
    let (_temp, s) = snapshotter();
    let long = "x".repeat(201);
    for key in ["", "with@anchor", "has space", long.as_str()] {
        let err = s.prepare(&ctx(), key, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey, "key {key:?}");
    }
}

#[test_log::test]
fn remove_waits_for_children() {
    let (_temp, s) = snapshotter();
    commit_layer(&s, "p", None, 0);
    s.prepare(&ctx(), "k1", Some("p")).unwrap();
    s.prepare(&ctx(), "k2", Some("p")).unwrap();

    let err = s.remove(&ctx(), "p").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HasChildren);

    s.remove(&ctx(), "k1").unwrap();
    let err = s.remove(&ctx(), "p").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HasChildren);

    // A committed child still holds the parent
    s.commit(&ctx(), "c2", "k2").unwrap();
    let err = s.remove(&ctx(), "p").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HasChildren);

    s.remove(&ctx(), "c2").unwrap();
    s.remove(&ctx(), "p").unwrap();
    assert_eq!(s.walk(&ctx()).unwrap().count(), 0);
}

#[test]
fn committed_data_round_trips() {
    let (_temp, s) = snapshotter();
    let payload: Vec<u8> = (0..=255u8).cycle().take(300_000).collect();

    let mount = s.prepare(&ctx(), "build", None).unwrap();
    fs::create_dir_all(mount.path.join("usr/bin")).unwrap();
    fs::write(mount.path.join("usr/bin/tool"), &payload).unwrap();
    s.commit(&ctx(), "base", "build").unwrap();

    let child = s.prepare(&ctx(), "container", Some("base")).unwrap();
    assert_eq!(fs::read(child.path.join("usr/bin/tool")).unwrap(), payload);
}

#[test]
fn remove_twice_is_not_found() {
    let (_temp, s) = snapshotter();
    let sibling = s.prepare(&ctx(), "sibling", None).unwrap();
    fs::write(sibling.path.join("keep"), b"intact").unwrap();
    s.prepare(&ctx(), "doomed", None).unwrap();

    s.remove(&ctx(), "doomed").unwrap();
    let err = s.remove(&ctx(), "doomed").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(fs::read(sibling.path.join("keep")).unwrap(), b"intact");
    assert_eq!(s.stat(&ctx(), "sibling").unwrap().kind, LayerKind::Active);
}

#[test]
fn remove_tolerates_external_unmount() {
    let (_temp, s) = snapshotter();
    s.prepare(&ctx(), "k", None).unwrap();
    let dataset = s.naming().dataset(LayerKind::Active, &"k".parse().unwrap());
    s.backend().unmount(&ctx(), &dataset, false).unwrap();

    s.remove(&ctx(), "k").unwrap();
    assert_eq!(s.stat(&ctx(), "k").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn mounts_remounts_after_external_unmount() {
    let (_temp, s) = snapshotter();
    let prepared = s.prepare(&ctx(), "k", None).unwrap();
    let dataset = s.naming().dataset(LayerKind::Active, &"k".parse().unwrap());
    s.backend().unmount(&ctx(), &dataset, false).unwrap();

    let mount = s.mounts(&ctx(), "k").unwrap();
    assert_eq!(mount, prepared);
    assert_eq!(
        s.backend()
            .get_property(&ctx(), &dataset, "mounted")
            .unwrap()
            .as_deref(),
        Some("yes")
    );
}

#[test]
fn committed_mounts_are_read_only() {
    let (_temp, s) = snapshotter();
    commit_layer(&s, "base", None, 1);
    let mount = s.mounts(&ctx(), "base").unwrap();
    assert!(mount.readonly);
    assert!(mount.path.join("base.bin").exists());
}

#[test]
fn usage_excludes_ancestors() {
    let (_temp, s) = snapshotter();
    commit_layer(&s, "root", None, 0);
    commit_layer(&s, "l1", Some("root"), 0);
    commit_layer(&s, "l2", Some("l1"), MIB);
    commit_layer(&s, "l3", Some("l2"), 2 * MIB);

    let l1 = s.usage(&ctx(), "l1").unwrap();
    let l2 = s.usage(&ctx(), "l2").unwrap();
    let l3 = s.usage(&ctx(), "l3").unwrap();

    assert!(l1.size_bytes > 0);
    assert!(l2.size_bytes > MIB as u64);
    assert!(l3.size_bytes > 2 * MIB as u64);
    assert!(l3.size_bytes < l2.size_bytes + 2 * MIB as u64);

    assert_eq!(l1.inode_count, 0);
    assert_eq!(l2.inode_count, 1);
    assert_eq!(l3.inode_count, 1);
}

#[test]
fn usage_of_one_mebibyte_layer() {
    let (_temp, s) = snapshotter();
    s.prepare(&ctx(), "empty", None).unwrap();
    s.commit(&ctx(), "layer-1", "empty").unwrap();

    let mount = s.prepare(&ctx(), "work", Some("layer-1")).unwrap();
    fs::write(mount.path.join("blob"), vec![1u8; 1_048_576]).unwrap();

    // Active layers are measured too
    assert!(s.usage(&ctx(), "work").unwrap().size_bytes > 1_048_576);

    s.commit(&ctx(), "layer-2", "work").unwrap();
    assert!(s.usage(&ctx(), "layer-2").unwrap().size_bytes > 1_048_576);
}

#[test]
fn siblings_do_not_double_count_parent() {
    let (_temp, s) = snapshotter();
    commit_layer(&s, "parent", None, MIB);
    let parent = s.usage(&ctx(), "parent").unwrap().size_bytes;

    let mut children = 0;
    for name in ["a", "b", "c"] {
        commit_layer(&s, name, Some("parent"), 4096);
        children += s.usage(&ctx(), name).unwrap().size_bytes;
    }
    assert!(children < parent);
}

#[test]
fn usage_counts_survive_external_unmounts() {
    let (_temp, s) = snapshotter();
    let build = s.prepare(&ctx(), "build", None).unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        fs::write(build.path.join(name), b"x").unwrap();
    }
    s.commit(&ctx(), "base", "build").unwrap();
    let child = s.prepare(&ctx(), "child", Some("base")).unwrap();
    fs::write(child.path.join("own"), b"y").unwrap();

    assert_eq!(s.usage(&ctx(), "child").unwrap().inode_count, 1);

    let base = s.naming().dataset(LayerKind::Committed, &"base".parse().unwrap());
    s.backend().unmount(&ctx(), &base, false).unwrap();
    assert_eq!(s.usage(&ctx(), "child").unwrap().inode_count, 1);

    let own = s.naming().dataset(LayerKind::Active, &"child".parse().unwrap());
    s.backend().unmount(&ctx(), &own, false).unwrap();
    assert_eq!(s.usage(&ctx(), "child").unwrap().inode_count, 1);
    assert_eq!(s.usage(&ctx(), "base").unwrap().inode_count, 5);
}

#[test_log::test]
fn concurrent_prepares_share_one_anchor() {
    let (_temp, s) = snapshotter();
    commit_layer(&s, "parent", None, 128);
    let s = Arc::new(s);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let s = Arc::clone(&s);
            thread::spawn(move || s.prepare(&ctx(), &format!("child-{i}"), Some("parent")))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let parent = s
        .naming()
        .dataset(LayerKind::Committed, &"parent".parse().unwrap());
    let clones = s
        .backend()
        .get_property(&ctx(), &anchor_of(&parent), "clones")
        .unwrap()
        .unwrap();
    assert_eq!(clones.split(',').count(), 16);
}

#[test]
fn independent_lifecycles_run_concurrently() {
    let (_temp, s) = snapshotter();
    let s = Arc::new(s);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                let key = format!("build-{i}");
                let name = format!("layer-{i}");
                s.prepare(&ctx(), &key, None)?;
                s.commit(&ctx(), &name, &key)?;
                s.prepare(&ctx(), &key, Some(name.as_str()))?;
                s.remove(&ctx(), &key)?;
                s.remove(&ctx(), &name)
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(s.walk(&ctx()).unwrap().count(), 0);
}

#[test]
fn stat_and_walk_report_lineage() {
    let (_temp, s) = snapshotter();
    commit_layer(&s, "base", None, 0);
    s.prepare(&ctx(), "rw", Some("base")).unwrap();
    s.view(&ctx(), "ro", Some("base")).unwrap();

    let info = s.stat(&ctx(), "rw").unwrap();
    assert_eq!(info.kind, LayerKind::Active);
    assert_eq!(info.parent.as_ref().map(|p| p.as_str()), Some("base"));
    assert!(info.created.is_some());

    let base = s.stat(&ctx(), "base").unwrap();
    assert_eq!(base.kind, LayerKind::Committed);
    assert_eq!(base.parent, None);

    let mut layers: Vec<_> = s
        .walk(&ctx())
        .unwrap()
        .map(|info| (info.key.to_string(), info.kind))
        .collect();
    layers.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        layers,
        vec![
            ("base".to_string(), LayerKind::Committed),
            ("ro".to_string(), LayerKind::View),
            ("rw".to_string(), LayerKind::Active),
        ]
    );
}

#[test]
fn layers_survive_reopen() {
    let temp = tempdir().unwrap();
    let config = SnapshotterConfig::default()
        .with_root(temp.path())
        .with_backend(BackendKind::Fake);

    let s = Snapshotter::open(&config).unwrap();
    s.prepare(&ctx(), "k", None).unwrap();
    s.commit(&ctx(), "base", "k").unwrap();
    s.close().unwrap();

    let s = Snapshotter::open(&config).unwrap();
    assert_eq!(s.stat(&ctx(), "base").unwrap().kind, LayerKind::Committed);
    s.prepare(&ctx(), "child", Some("base")).unwrap();
}

#[test]
fn closed_snapshotter_is_unavailable() {
    let (_temp, s) = snapshotter();
    s.close().unwrap();
    s.close().unwrap();

    let err = s.prepare(&ctx(), "k", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(s.walk(&ctx()).unwrap_err().kind(), ErrorKind::Unavailable);
}

#[test]
fn cancelled_context_stops_operations() {
    let (_temp, s) = snapshotter();
    let token = CancellationToken::new();
    token.cancel();

    let err = s
        .prepare(&OpContext::with_cancel(token), "k", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(s.walk(&ctx()).unwrap().count(), 0);
}

#[test]
fn root_must_be_a_mounted_dataset() {
    let temp = tempdir().unwrap();
    let backend = Arc::new(FakeBackend::open(temp.path().join("pool")).unwrap());
    let config = SnapshotterConfig::default().with_root(temp.path());

    let err = Snapshotter::new(&config, backend).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

/// Delegates to [`FakeBackend`] but fails the first call of a chosen operation.
#[derive(Debug)]
struct Faulty {
    inner: FakeBackend,
    fail: Mutex<Option<&'static str>>,
    cancel_after: Mutex<Option<&'static str>>,
}

impl Faulty {
    fn open(root: &Path) -> Self {
        Self {
            inner: FakeBackend::open(root).unwrap(),
            fail: Mutex::new(None),
            cancel_after: Mutex::new(None),
        }
    }

    fn fail_next(&self, operation: &'static str) {
        *self.fail.lock() = Some(operation);
    }

    /// Let the next `operation` complete, then report it as cancelled.
    fn cancel_after_next(&self, operation: &'static str) {
        *self.cancel_after.lock() = Some(operation);
    }

    fn late_cancel(&self, operation: &str, subject: &str) -> BackendResult<()> {
        let mut pending = self.cancel_after.lock();
        if *pending == Some(operation) {
            *pending = None;
            return Err(BackendError::cancelled(subject));
        }
        Ok(())
    }

    fn trip(&self, operation: &str, subject: &str) -> BackendResult<()> {
        let mut fail = self.fail.lock();
        if *fail == Some(operation) {
            *fail = None;
            return Err(BackendError::new(
                BackendErrorKind::Busy,
                subject,
                "injected failure",
            ));
        }
        Ok(())
    }
}

impl Backend for Faulty {
    fn fs_type(&self) -> &'static str {
        self.inner.fs_type()
    }

    fn dataset_for_mountpoint(&self, ctx: &OpContext, path: &Path) -> BackendResult<String> {
        self.inner.dataset_for_mountpoint(ctx, path)
    }

    fn create_filesystem(
        &self,
        ctx: &OpContext,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()> {
        self.trip("create", name)?;
        self.inner.create_filesystem(ctx, name, properties)
    }

    fn create_snapshot(&self, ctx: &OpContext, snapshot: &str) -> BackendResult<()> {
        self.trip("snapshot", snapshot)?;
        self.inner.create_snapshot(ctx, snapshot)
    }

    fn clone_snapshot(
        &self,
        ctx: &OpContext,
        snapshot: &str,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()> {
        self.trip("clone", name)?;
        self.inner.clone_snapshot(ctx, snapshot, name, properties)
    }

    fn rename(&self, ctx: &OpContext, from: &str, to: &str) -> BackendResult<()> {
        self.trip("rename", from)?;
        self.inner.rename(ctx, from, to)?;
        self.late_cancel("rename", from)
    }

    fn destroy(&self, ctx: &OpContext, name: &str, flags: DestroyFlags) -> BackendResult<()> {
        self.trip("destroy", name)?;
        self.inner.destroy(ctx, name, flags)
    }

    fn get_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
    ) -> BackendResult<Option<String>> {
        if property == "mountpoint" {
            self.trip("mountpoint", name)?;
        }
        self.inner.get_property(ctx, name, property)
    }

    fn set_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
        value: &str,
    ) -> BackendResult<()> {
        self.trip("set", name)?;
        self.inner.set_property(ctx, name, property, value)
    }

    fn mount(&self, ctx: &OpContext, name: &str) -> BackendResult<()> {
        self.trip("mount", name)?;
        self.inner.mount(ctx, name)
    }

    fn unmount(&self, ctx: &OpContext, name: &str, force: bool) -> BackendResult<()> {
        self.trip("unmount", name)?;
        self.inner.unmount(ctx, name, force)
    }

    fn list(&self, ctx: &OpContext, root: &str) -> BackendResult<Vec<DatasetEntry>> {
        self.inner.list(ctx, root)
    }
}

fn faulty_snapshotter() -> (TempDir, Arc<Faulty>, Snapshotter) {
    let temp = tempdir().unwrap();
    let backend = Arc::new(Faulty::open(temp.path()));
    let config = SnapshotterConfig::default().with_root(temp.path());
    let snapshotter = Snapshotter::new(&config, Arc::clone(&backend) as Arc<dyn Backend>).unwrap();
    (temp, backend, snapshotter)
}

#[test_log::test]
fn failed_prepare_rolls_back() {
    let (_temp, backend, s) = faulty_snapshotter();
    backend.fail_next("mountpoint");

    let err = s.prepare(&ctx(), "k", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert_eq!(s.walk(&ctx()).unwrap().count(), 0);

    s.prepare(&ctx(), "k", None).unwrap();
}

#[test_log::test]
fn failed_commit_restores_active_layer() {
    let (_temp, backend, s) = faulty_snapshotter();
    let mount = s.prepare(&ctx(), "k", None).unwrap();
    fs::write(mount.path.join("file"), b"data").unwrap();

    backend.fail_next("snapshot");
    let err = s.commit(&ctx(), "base", "k").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    assert_eq!(s.stat(&ctx(), "k").unwrap().kind, LayerKind::Active);
    assert_eq!(s.stat(&ctx(), "base").unwrap_err().kind(), ErrorKind::NotFound);
    let dataset = s.naming().dataset(LayerKind::Active, &"k".parse().unwrap());
    assert_eq!(
        backend
            .get_property(&ctx(), &dataset, "readonly")
            .unwrap()
            .as_deref(),
        Some("off")
    );
    assert_eq!(fs::read(s.mounts(&ctx(), "k").unwrap().path.join("file")).unwrap(), b"data");

    // A retry after the transient failure succeeds
    s.commit(&ctx(), "base", "k").unwrap();
}

#[test]
fn failed_rename_leaves_source_mounted() {
    let (_temp, backend, s) = faulty_snapshotter();
    s.prepare(&ctx(), "k", None).unwrap();

    backend.fail_next("rename");
    let err = s.commit(&ctx(), "base", "k").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    let dataset = s.naming().dataset(LayerKind::Active, &"k".parse().unwrap());
    assert_eq!(
        backend
            .get_property(&ctx(), &dataset, "mounted")
            .unwrap()
            .as_deref(),
        Some("yes")
    );
}

#[test]
fn cancelled_rename_that_landed_is_undone() {
    let (_temp, backend, s) = faulty_snapshotter();
    let mount = s.prepare(&ctx(), "k", None).unwrap();
    fs::write(mount.path.join("data"), b"kept").unwrap();

    backend.cancel_after_next("rename");
    let err = s.commit(&ctx(), "base", "k").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let committed = s.naming().dataset(LayerKind::Committed, &"base".parse().unwrap());
    assert!(!backend.exists(&ctx(), &committed).unwrap());
    assert!(!backend.exists(&ctx(), &anchor_of(&committed)).unwrap());

    let active = s.naming().dataset(LayerKind::Active, &"k".parse().unwrap());
    assert_eq!(
        backend
            .get_property(&ctx(), &active, "mounted")
            .unwrap()
            .as_deref(),
        Some("yes")
    );
    assert_eq!(s.stat(&ctx(), "k").unwrap().kind, LayerKind::Active);
    assert_eq!(fs::read(mount.path.join("data")).unwrap(), b"kept");

    s.commit(&ctx(), "base", "k").unwrap();
}

#[test]
fn backend_errors_surface_unchanged() {
    let (_temp, backend, s) = faulty_snapshotter();
    s.prepare(&ctx(), "k", None).unwrap();

    backend.fail_next("destroy");
    let err = s.remove(&ctx(), "k").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    // The layer was unmounted before the failure; retrying tolerates that
    s.remove(&ctx(), "k").unwrap();
}

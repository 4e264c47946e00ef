//! File-backed emulation of a copy-on-write volume manager.
//!
//! Datasets are plain directories under the root, snapshots are full
//! copies kept in a side directory, and clones start as copies of their
//! origin snapshot. Space accounting compares a dataset's files against
//! its origin, so a clone only pays for what it changed. State is
//! persisted as JSON next to the data so separate processes see the same
//! namespace. Used by the test suite and by `stratum --backend fake`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stratum_common::{StratumPaths, StratumResult};
use walkdir::WalkDir;

use super::{Backend, BackendError, BackendErrorKind, BackendResult, DatasetEntry, DestroyFlags};
use crate::context::OpContext;

/// Name of the root dataset mounted at the fake backend's root directory.
pub const FAKE_ROOT_DATASET: &str = "fake/stratum";

/// Bytes every dataset and snapshot is charged for metadata.
pub const METADATA_OVERHEAD: u64 = 16 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FakeState {
    datasets: BTreeMap<String, DatasetRecord>,
    snapshots: BTreeMap<String, SnapshotRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetRecord {
    origin: Option<String>,
    mounted: bool,
    readonly: bool,
    created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
    written: u64,
    created: i64,
}

impl DatasetRecord {
    fn new(origin: Option<String>, properties: &[(&str, &str)]) -> Self {
        Self {
            origin,
            mounted: true,
            readonly: properties.contains(&("readonly", "on")),
            created: chrono::Utc::now().timestamp(),
        }
    }
}

impl FakeState {
    fn with_root() -> Self {
        let mut state = Self::default();
        state
            .datasets
            .insert(FAKE_ROOT_DATASET.to_string(), DatasetRecord::new(None, &[]));
        state
    }

    fn dataset(&self, name: &str) -> BackendResult<&DatasetRecord> {
        self.datasets
            .get(name)
            .ok_or_else(|| BackendError::not_found(name))
    }

    fn dataset_mut(&mut self, name: &str) -> BackendResult<&mut DatasetRecord> {
        self.datasets
            .get_mut(name)
            .ok_or_else(|| BackendError::not_found(name))
    }

    fn clones_of(&self, snapshot: &str) -> Vec<String> {
        self.datasets
            .iter()
            .filter(|(_, record)| record.origin.as_deref() == Some(snapshot))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn snapshots_of(&self, dataset: &str) -> Vec<String> {
        let prefix = format!("{dataset}@");
        self.snapshots
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn has_children(&self, dataset: &str) -> bool {
        let prefix = format!("{dataset}/");
        self.datasets.keys().any(|name| name.starts_with(&prefix))
    }
}

/// Directory-tree fake of a ZFS-like backend.
#[derive(Debug)]
pub struct FakeBackend {
    paths: StratumPaths,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    /// Open (or initialise) a fake pool whose root dataset is mounted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or the state file is unreadable.
    pub fn open(root: impl Into<PathBuf>) -> StratumResult<Self> {
        let paths = StratumPaths::with_root(root);
        paths.create_dirs()?;

        let state_path = paths.fake_state();
        let state = if state_path.exists() {
            serde_json::from_str(&fs::read_to_string(&state_path)?)?
        } else {
            FakeState::with_root()
        };

        let backend = Self {
            paths,
            state: Mutex::new(state),
        };
        backend.persist(&backend.state.lock())?;

        tracing::debug!(root = %backend.paths.root.display(), "Opened fake backend");
        Ok(backend)
    }

    /// Root directory of the fake pool.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    fn relative(dataset: &str) -> &str {
        dataset
            .strip_prefix(FAKE_ROOT_DATASET)
            .map_or(dataset, |rest| rest.trim_start_matches('/'))
    }

    fn data_dir(&self, dataset: &str) -> PathBuf {
        self.paths.root.join(Self::relative(dataset))
    }

    fn snapshot_dir(&self, snapshot: &str) -> PathBuf {
        let (dataset, name) = snapshot.split_once('@').unwrap_or((snapshot, ""));
        self.paths
            .fake_snapshots()
            .join(Self::relative(dataset))
            .join(format!("@{name}"))
    }

    fn persist(&self, state: &FakeState) -> BackendResult<()> {
        let path = self.paths.fake_state();
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::new(BackendErrorKind::Unknown, FAKE_ROOT_DATASET, e.to_string())
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| io_error(FAKE_ROOT_DATASET, &e))
    }

    fn dataset_exclusive(&self, dataset: &str, origin: Option<&str>) -> u64 {
        let origin_dir = origin.map(|snapshot| self.snapshot_dir(snapshot));
        exclusive_bytes(&self.data_dir(dataset), origin_dir.as_deref()) + METADATA_OVERHEAD
    }
}

fn io_error(subject: &str, err: &io::Error) -> BackendError {
    BackendError::new(BackendErrorKind::Unknown, subject, err.to_string())
}

fn check(ctx: &OpContext, subject: &str) -> BackendResult<()> {
    if ctx.is_cancelled() {
        return Err(BackendError::cancelled(subject));
    }
    Ok(())
}

fn parent_of(name: &str) -> Option<&str> {
    name.rsplit_once('/').map(|(parent, _)| parent)
}

fn split_snapshot(snapshot: &str) -> BackendResult<(&str, &str)> {
    snapshot
        .split_once('@')
        .filter(|(dataset, name)| !dataset.is_empty() && !name.is_empty())
        .ok_or_else(|| {
            BackendError::new(
                BackendErrorKind::Unknown,
                snapshot,
                "invalid snapshot name",
            )
        })
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let dest = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Bytes of regular files under `dir` that differ from the same path under `origin`.
fn exclusive_bytes(dir: &Path, origin: Option<&Path>) -> u64 {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let Some(origin) = origin else { return true };
            let Ok(rel) = entry.path().strip_prefix(dir) else {
                return true;
            };
            let inherited = origin.join(rel);
            match (fs::read(entry.path()), fs::read(&inherited)) {
                (Ok(ours), Ok(theirs)) => ours != theirs,
                _ => true,
            }
        })
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn tree_bytes(dir: &Path) -> u64 {
    exclusive_bytes(dir, None)
}

fn remove_dir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl Backend for FakeBackend {
    fn fs_type(&self) -> &'static str {
        "bind"
    }

    fn dataset_for_mountpoint(&self, ctx: &OpContext, path: &Path) -> BackendResult<String> {
        let subject = path.display().to_string();
        check(ctx, &subject)?;
        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        if canonical(path) == canonical(&self.paths.root) {
            Ok(FAKE_ROOT_DATASET.to_string())
        } else {
            Err(BackendError::new(
                BackendErrorKind::Unavailable,
                subject,
                "no fake filesystem is mounted at this path",
            ))
        }
    }

    fn create_filesystem(
        &self,
        ctx: &OpContext,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()> {
        check(ctx, name)?;
        let mut state = self.state.lock();
        if state.datasets.contains_key(name) {
            return Err(BackendError::already_exists(name));
        }
        let parent = parent_of(name).ok_or_else(|| BackendError::not_found(name))?;
        state.dataset(parent)?;

        fs::create_dir_all(self.data_dir(name)).map_err(|e| io_error(name, &e))?;
        state
            .datasets
            .insert(name.to_string(), DatasetRecord::new(None, properties));
        self.persist(&state)
    }

    fn create_snapshot(&self, ctx: &OpContext, snapshot: &str) -> BackendResult<()> {
        check(ctx, snapshot)?;
        let (dataset, _) = split_snapshot(snapshot)?;
        let mut state = self.state.lock();
        let origin = state.dataset(dataset)?.origin.clone();
        if state.snapshots.contains_key(snapshot) {
            return Err(BackendError::already_exists(snapshot));
        }

        let written = self.dataset_exclusive(dataset, origin.as_deref());
        copy_tree(&self.data_dir(dataset), &self.snapshot_dir(snapshot))
            .map_err(|e| io_error(snapshot, &e))?;
        state.snapshots.insert(
            snapshot.to_string(),
            SnapshotRecord {
                written,
                created: chrono::Utc::now().timestamp(),
            },
        );
        self.persist(&state)
    }

    fn clone_snapshot(
        &self,
        ctx: &OpContext,
        snapshot: &str,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()> {
        check(ctx, name)?;
        let mut state = self.state.lock();
        if !state.snapshots.contains_key(snapshot) {
            return Err(BackendError::not_found(snapshot));
        }
        if state.datasets.contains_key(name) {
            return Err(BackendError::already_exists(name));
        }
        let parent = parent_of(name).ok_or_else(|| BackendError::not_found(name))?;
        state.dataset(parent)?;

        copy_tree(&self.snapshot_dir(snapshot), &self.data_dir(name))
            .map_err(|e| io_error(name, &e))?;
        state.datasets.insert(
            name.to_string(),
            DatasetRecord::new(Some(snapshot.to_string()), properties),
        );
        self.persist(&state)
    }

    fn rename(&self, ctx: &OpContext, from: &str, to: &str) -> BackendResult<()> {
        check(ctx, from)?;
        let mut state = self.state.lock();
        state.dataset(from)?;
        if state.datasets.contains_key(to) {
            return Err(BackendError::already_exists(to));
        }
        let parent = parent_of(to).ok_or_else(|| BackendError::not_found(to))?;
        state.dataset(parent)?;
        if state.has_children(from) {
            return Err(BackendError::new(
                BackendErrorKind::Busy,
                from,
                "filesystem has children",
            ));
        }

        let (old_dir, new_dir) = (self.data_dir(from), self.data_dir(to));
        if let Some(dir) = new_dir.parent() {
            fs::create_dir_all(dir).map_err(|e| io_error(to, &e))?;
        }
        fs::rename(&old_dir, &new_dir).map_err(|e| io_error(from, &e))?;

        if let Some(record) = state.datasets.remove(from) {
            state.datasets.insert(to.to_string(), record);
        }

        // Snapshots follow their dataset, and clones keep pointing at them.
        for old_snapshot in state.snapshots_of(from) {
            let new_snapshot = format!("{to}{}", &old_snapshot[from.len()..]);
            let new_snapshot_dir = self.snapshot_dir(&new_snapshot);
            if let Some(dir) = new_snapshot_dir.parent() {
                fs::create_dir_all(dir).map_err(|e| io_error(to, &e))?;
            }
            fs::rename(self.snapshot_dir(&old_snapshot), &new_snapshot_dir)
                .map_err(|e| io_error(&old_snapshot, &e))?;
            if let Some(record) = state.snapshots.remove(&old_snapshot) {
                state.snapshots.insert(new_snapshot.clone(), record);
            }
            for record in state.datasets.values_mut() {
                if record.origin.as_deref() == Some(old_snapshot.as_str()) {
                    record.origin = Some(new_snapshot.clone());
                }
            }
        }

        self.persist(&state)
    }

    fn destroy(&self, ctx: &OpContext, name: &str, flags: DestroyFlags) -> BackendResult<()> {
        check(ctx, name)?;
        let mut state = self.state.lock();
        let busy = |detail: &str| BackendError::new(BackendErrorKind::Busy, name, detail);

        if name.contains('@') {
            if !state.snapshots.contains_key(name) {
                return Err(BackendError::not_found(name));
            }
            if !state.clones_of(name).is_empty() {
                return Err(busy("snapshot has dependent clones"));
            }
            remove_dir(&self.snapshot_dir(name)).map_err(|e| io_error(name, &e))?;
            state.snapshots.remove(name);
            return self.persist(&state);
        }

        state.dataset(name)?;
        if state.has_children(name) {
            return Err(busy("filesystem has children"));
        }
        let snapshots = state.snapshots_of(name);
        if !snapshots.is_empty() && !flags.recursive {
            return Err(busy("filesystem has snapshots, use recursive destroy"));
        }
        if snapshots.iter().any(|s| !state.clones_of(s).is_empty()) {
            return Err(busy("filesystem has dependent clones"));
        }

        for snapshot in &snapshots {
            remove_dir(&self.snapshot_dir(snapshot)).map_err(|e| io_error(snapshot, &e))?;
            state.snapshots.remove(snapshot);
        }
        remove_dir(&self.data_dir(name)).map_err(|e| io_error(name, &e))?;
        state.datasets.remove(name);
        self.persist(&state)
    }

    fn get_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
    ) -> BackendResult<Option<String>> {
        check(ctx, name)?;
        let state = self.state.lock();
        let bad_property = || {
            BackendError::new(
                BackendErrorKind::Unknown,
                name,
                format!("bad property list: invalid property '{property}'"),
            )
        };

        if name.contains('@') {
            let record = state
                .snapshots
                .get(name)
                .ok_or_else(|| BackendError::not_found(name))?;
            let value = match property {
                "type" => Some("snapshot".to_string()),
                "written" | "used" => Some(record.written.to_string()),
                "referenced" => {
                    Some((tree_bytes(&self.snapshot_dir(name)) + METADATA_OVERHEAD).to_string())
                }
                "creation" => Some(record.created.to_string()),
                "clones" => Some(state.clones_of(name).join(",")).filter(|c| !c.is_empty()),
                _ => return Err(bad_property()),
            };
            return Ok(value);
        }

        let record = state.dataset(name)?;
        let value = match property {
            "type" => Some("filesystem".to_string()),
            "mountpoint" => Some(self.data_dir(name).display().to_string()),
            "mounted" => Some(if record.mounted { "yes" } else { "no" }.to_string()),
            "origin" => record.origin.clone(),
            "readonly" => Some(if record.readonly { "on" } else { "off" }.to_string()),
            "creation" => Some(record.created.to_string()),
            "used" | "written" => Some(
                self.dataset_exclusive(name, record.origin.as_deref())
                    .to_string(),
            ),
            "referenced" => {
                Some((tree_bytes(&self.data_dir(name)) + METADATA_OVERHEAD).to_string())
            }
            _ => return Err(bad_property()),
        };
        Ok(value)
    }

    fn set_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
        value: &str,
    ) -> BackendResult<()> {
        check(ctx, name)?;
        let mut state = self.state.lock();
        let record = state.dataset_mut(name)?;
        match (property, value) {
            ("readonly", "on") => record.readonly = true,
            ("readonly", "off") => record.readonly = false,
            _ => {
                return Err(BackendError::new(
                    BackendErrorKind::Unknown,
                    name,
                    format!("cannot set property {property}={value}"),
                ));
            }
        }
        self.persist(&state)
    }

    fn mount(&self, ctx: &OpContext, name: &str) -> BackendResult<()> {
        check(ctx, name)?;
        let mut state = self.state.lock();
        let record = state.dataset_mut(name)?;
        if record.mounted {
            return Err(BackendError::new(
                BackendErrorKind::AlreadyExists,
                name,
                "filesystem already mounted",
            ));
        }
        record.mounted = true;
        self.persist(&state)
    }

    fn unmount(&self, ctx: &OpContext, name: &str, _force: bool) -> BackendResult<()> {
        check(ctx, name)?;
        let mut state = self.state.lock();
        let record = state.dataset_mut(name)?;
        if !record.mounted {
            return Err(BackendError::new(
                BackendErrorKind::NotFound,
                name,
                "not currently mounted",
            ));
        }
        record.mounted = false;
        self.persist(&state)
    }

    fn list(&self, ctx: &OpContext, root: &str) -> BackendResult<Vec<DatasetEntry>> {
        check(ctx, root)?;
        let state = self.state.lock();
        state.dataset(root)?;
        let prefix = format!("{root}/");
        Ok(state
            .datasets
            .iter()
            .filter(|(name, _)| name.as_str() == root || name.starts_with(&prefix))
            .map(|(name, record)| DatasetEntry {
                name: name.clone(),
                origin: record.origin.clone(),
                created: Some(record.created),
            })
            .collect())
    }

    fn close(&self) -> BackendResult<()> {
        self.persist(&self.state.lock())
    }
}

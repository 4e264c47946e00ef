//! Layer lifecycle manager.
//!
//! A layer's backend dataset lives at `<root>/<kind>/<escaped key>`, so its
//! kind is recovered from the container it sits in and its parent from the
//! dataset's `origin`. Nothing else is persisted.
//!
//! Every lifecycle operation holds the per-key locks of the keys it touches
//! for its whole duration. Prepare and View also hold the parent's lock,
//! which serializes lazy anchor creation against Remove of that parent.

mod lifecycle;
mod query;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use stratum_common::{LayerKey, StratumError, StratumResult};

use crate::backend::{self, Backend, BackendErrorKind, DestroyFlags};
use crate::config::SnapshotterConfig;
use crate::context::OpContext;
use crate::layer::LayerKind;
use crate::locks::LockTable;
use crate::mount::Mount;
use crate::naming::{Naming, anchor_of};

pub use query::Walk;

/// Copy-on-write layer snapshotter.
#[derive(Debug)]
pub struct Snapshotter {
    backend: Arc<dyn Backend>,
    naming: Naming,
    locks: LockTable,
    /// Source keys committed by this instance, mapped to their committed name.
    committed: Mutex<HashMap<LayerKey, LayerKey>>,
    closed: AtomicBool,
}

impl Snapshotter {
    /// Create a snapshotter over `backend`, rooted at the dataset mounted at `config.root`.
    ///
    /// # Errors
    ///
    /// Returns an error if no dataset is mounted at the root or the kind
    /// containers cannot be created.
    pub fn new(config: &SnapshotterConfig, backend: Arc<dyn Backend>) -> StratumResult<Self> {
        let ctx = OpContext::background();
        let root = backend.dataset_for_mountpoint(&ctx, &config.root)?;
        let naming = Naming::new(root);

        for kind in LayerKind::ALL {
            let container = naming.container(kind);
            match backend.create_filesystem(&ctx, &container, &[]) {
                Ok(()) => tracing::debug!(dataset = %container, "Created layer container"),
                Err(err) if err.is(BackendErrorKind::AlreadyExists) => {}
                Err(err) => return Err(err.into()),
            }
        }

        tracing::info!(
            root = %config.root.display(),
            dataset = naming.root(),
            fs_type = backend.fs_type(),
            "Snapshotter ready"
        );

        Ok(Self {
            backend,
            naming,
            locks: LockTable::new(),
            committed: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Build the configured backend and create a snapshotter over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened or [`Snapshotter::new`] fails.
    pub fn open(config: &SnapshotterConfig) -> StratumResult<Self> {
        Self::new(config, config.build_backend()?)
    }

    /// The naming scheme in use.
    #[must_use]
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// The backend in use.
    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Stop accepting operations and let the backend release its resources.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if it fails to release its resources.
    pub fn close(&self) -> StratumResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.close()?;
        tracing::info!(dataset = self.naming.root(), "Snapshotter closed");
        Ok(())
    }

    fn ensure_open(&self, ctx: &OpContext, operation: &str) -> StratumResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StratumError::Unavailable {
                detail: "snapshotter is closed".to_string(),
            });
        }
        ctx.check(operation)
    }

    fn parse_key(&self, key: &str) -> StratumResult<LayerKey> {
        let key = LayerKey::new(key)?;
        self.naming.check_fits(&key)?;
        Ok(key)
    }

    /// Find which kind `key` currently is, probing every container.
    fn locate(&self, ctx: &OpContext, key: &LayerKey) -> StratumResult<Option<LayerKind>> {
        for kind in LayerKind::ALL {
            if self.backend.exists(ctx, &self.naming.dataset(kind, key))? {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    fn locate_existing(&self, ctx: &OpContext, key: &LayerKey) -> StratumResult<LayerKind> {
        self.locate(ctx, key)?
            .ok_or_else(|| StratumError::not_found(key.as_str()))
    }

    /// Make sure `dataset` is mounted and describe its mount.
    fn mount_for(&self, ctx: &OpContext, kind: LayerKind, dataset: &str) -> StratumResult<Mount> {
        let backend = self.backend();
        if !backend::is_mounted(backend, ctx, dataset)? {
            tracing::debug!(dataset, "Mounting dataset");
            match backend.mount(ctx, dataset) {
                Err(err) if !err.is(BackendErrorKind::AlreadyExists) => return Err(err.into()),
                _ => {}
            }
        }

        let mountpoint =
            backend::mountpoint(backend, ctx, dataset)?.ok_or_else(|| StratumError::Unknown {
                detail: format!("{dataset} has no mountpoint"),
            })?;

        Ok(Mount::for_dataset(
            backend.fs_type(),
            dataset,
            &mountpoint,
            kind.is_readonly(),
        ))
    }

    /// Unmount `dataset`, treating "not mounted" as success.
    fn unmount_tolerant(&self, ctx: &OpContext, dataset: &str) -> StratumResult<()> {
        let backend = self.backend();
        if !backend::is_mounted(backend, ctx, dataset)? {
            return Ok(());
        }
        match backend.unmount(ctx, dataset, false) {
            Err(err) if !err.is(BackendErrorKind::NotFound) => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Create the anchor snapshot of a committed dataset unless it exists.
    fn ensure_anchor(&self, ctx: &OpContext, dataset: &str) -> StratumResult<String> {
        let anchor = anchor_of(dataset);
        if self.backend.exists(ctx, &anchor)? {
            return Ok(anchor);
        }
        match self.backend.create_snapshot(ctx, &anchor) {
            Ok(()) => tracing::debug!(snapshot = %anchor, "Created anchor snapshot"),
            Err(err) if err.is(BackendErrorKind::AlreadyExists) => {
                tracing::debug!(snapshot = %anchor, "Anchor snapshot already present");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(anchor)
    }

    /// Number of datasets cloned from the anchor of `dataset`.
    fn clone_count(&self, ctx: &OpContext, dataset: &str) -> StratumResult<usize> {
        let clones = match self.backend.get_property(ctx, &anchor_of(dataset), "clones") {
            Ok(clones) => clones,
            Err(err) if err.is(BackendErrorKind::NotFound) => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        Ok(clones.map_or(0, |list| {
            list.split(',').filter(|name| !name.trim().is_empty()).count()
        }))
    }

    /// Best-effort destroy used to roll back a half-created layer.
    fn discard(&self, dataset: &str) {
        let ctx = OpContext::background();
        let flags = DestroyFlags {
            recursive: true,
            force_unmount: true,
        };
        match self.backend.destroy(&ctx, dataset, flags) {
            Ok(()) => tracing::debug!(dataset, "Rolled back dataset"),
            Err(err) if err.is(BackendErrorKind::NotFound) => {}
            Err(err) => tracing::warn!(dataset, error = %err, "Rollback failed"),
        }
    }
}

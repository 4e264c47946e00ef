//! Exclusive usage accounting.
//!
//! Bytes come from the backend's own accounting so that inherited blocks
//! are never counted twice. A committed layer reports the `written`
//! property of its anchor snapshot, which covers everything written since
//! the clone origin. Active and view layers report the dataset's `used`,
//! which for a clone excludes the origin's blocks. Both include the
//! dataset's metadata, so an empty layer is never zero.
//!
//! Object counts are the net number of entries the layer adds on top of its
//! parent's tree. Mount state is re-derived from the backend, so a layer or
//! parent unmounted behind our back is mounted again before it is counted.

use std::path::Path;

use stratum_common::{StratumError, StratumResult};
use walkdir::WalkDir;

use crate::backend::{self, Backend, BackendErrorKind};
use crate::context::OpContext;
use crate::layer::{LayerKind, Usage};
use crate::naming::anchor_of;

/// Computes [`Usage`] for one layer dataset.
#[derive(Debug, Clone, Copy)]
pub struct UsageAccountant<'a> {
    backend: &'a dyn Backend,
}

impl<'a> UsageAccountant<'a> {
    /// Create an accountant querying `backend`.
    #[must_use]
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Usage of `dataset`, a layer of `kind` cloned from `parent` (a dataset) if any.
    ///
    /// # Errors
    ///
    /// Returns the classified backend error, or an I/O error while counting objects.
    pub fn measure(
        &self,
        ctx: &OpContext,
        kind: LayerKind,
        dataset: &str,
        parent: Option<&str>,
    ) -> StratumResult<Usage> {
        let size_bytes = self.exclusive_bytes(ctx, kind, dataset)?;

        let own = self.objects(ctx, dataset)?;
        let inherited = match parent {
            Some(parent) => self.objects(ctx, parent)?,
            None => 0,
        };

        let usage = Usage {
            size_bytes,
            inode_count: own.saturating_sub(inherited),
        };
        tracing::debug!(
            dataset,
            size_bytes = usage.size_bytes,
            inode_count = usage.inode_count,
            "Measured usage"
        );
        Ok(usage)
    }

    fn exclusive_bytes(
        &self,
        ctx: &OpContext,
        kind: LayerKind,
        dataset: &str,
    ) -> StratumResult<u64> {
        if kind == LayerKind::Committed {
            match backend::numeric_property(self.backend, ctx, &anchor_of(dataset), "written") {
                Ok(bytes) => return Ok(bytes),
                // A committed layer always gets an anchor, but one removed
                // out-of-band still leaves the dataset measurable.
                Err(err) if err.is(BackendErrorKind::NotFound) => {
                    tracing::debug!(dataset, "Anchor missing, falling back to used");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(backend::numeric_property(
            self.backend,
            ctx,
            dataset,
            "used",
        )?)
    }

    fn objects(&self, ctx: &OpContext, dataset: &str) -> StratumResult<u64> {
        if !backend::is_mounted(self.backend, ctx, dataset)? {
            tracing::debug!(dataset, "Mounting dataset to count objects");
            match self.backend.mount(ctx, dataset) {
                Err(err) if !err.is(BackendErrorKind::AlreadyExists) => return Err(err.into()),
                _ => {}
            }
        }
        match backend::mountpoint(self.backend, ctx, dataset)? {
            Some(path) => count_objects(&path),
            None => Ok(0),
        }
    }
}

/// Number of filesystem objects below `path`, `path` itself excluded.
///
/// # Errors
///
/// Returns an I/O error if part of the tree cannot be read.
pub fn count_objects(path: &Path) -> StratumResult<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut total = 0;
    for entry in WalkDir::new(path).min_depth(1) {
        entry.map_err(|e| StratumError::Io(e.into()))?;
        total += 1;
    }
    Ok(total)
}

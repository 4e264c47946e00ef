//! Copy-on-write volume backends.
//!
//! The lifecycle manager only talks to a backend through [`Backend`]:
//! filesystem/snapshot/clone creation, rename, destroy, properties,
//! mounting and listing. Failures are classified here into
//! [`BackendErrorKind`] and surfaced unchanged as [`StratumError`].
//! Backends never retry.

mod fake;
mod zfs;

use std::fmt;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use stratum_common::StratumError;
use thiserror::Error;

use crate::context::OpContext;

pub use fake::{FAKE_ROOT_DATASET, FakeBackend, METADATA_OVERHEAD};
pub use zfs::{ZfsCli, classify_stderr};

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Dataset, snapshot or mount does not exist.
    NotFound,
    /// Name already taken, or already mounted.
    AlreadyExists,
    /// Dataset has dependents or is in use.
    Busy,
    /// Backend unreachable, privilege denied, or pool absent.
    Unavailable,
    /// The call was abandoned on request.
    Cancelled,
    /// Anything else.
    Unknown,
}

/// A classified backend failure.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {subject}: {detail}")]
#[diagnostic(code(stratum::backend))]
pub struct BackendError {
    /// Classification.
    pub kind: BackendErrorKind,
    /// Dataset or snapshot the call addressed.
    pub subject: String,
    /// Backend-provided detail.
    pub detail: String,
}

impl BackendError {
    /// Create a classified error.
    pub fn new(kind: BackendErrorKind, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`BackendErrorKind::NotFound`] error.
    pub fn not_found(subject: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, subject, "does not exist")
    }

    /// Shorthand for a [`BackendErrorKind::AlreadyExists`] error.
    pub fn already_exists(subject: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::AlreadyExists, subject, "already exists")
    }

    /// Shorthand for a [`BackendErrorKind::Cancelled`] error.
    pub fn cancelled(subject: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Cancelled, subject, "cancelled by caller")
    }

    /// Whether this error has the given classification.
    #[must_use]
    pub fn is(&self, kind: BackendErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<BackendError> for StratumError {
    fn from(err: BackendError) -> Self {
        match err.kind {
            BackendErrorKind::NotFound => Self::NotFound { what: err.subject },
            BackendErrorKind::AlreadyExists => Self::AlreadyExists { what: err.subject },
            BackendErrorKind::Busy => Self::Busy {
                resource: err.subject,
                detail: err.detail,
            },
            BackendErrorKind::Unavailable => Self::Unavailable { detail: err.detail },
            BackendErrorKind::Cancelled => Self::Cancelled {
                operation: err.subject,
            },
            BackendErrorKind::Unknown => Self::Unknown {
                detail: format!("{}: {}", err.subject, err.detail),
            },
        }
    }
}

/// Flags for [`Backend::destroy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyFlags {
    /// Also destroy the dataset's snapshots.
    pub recursive: bool,
    /// Unmount even if busy.
    pub force_unmount: bool,
}

/// One filesystem returned by [`Backend::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    /// Full dataset name.
    pub name: String,
    /// Snapshot this dataset was cloned from.
    pub origin: Option<String>,
    /// Creation time, seconds since the epoch.
    pub created: Option<i64>,
}

/// Operations the lifecycle manager needs from a copy-on-write volume manager.
///
/// Every call is synchronous. Implementations should check
/// [`OpContext::is_cancelled`] and stop waiting on long calls once it is set.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Mount type reported in mount descriptors (`zfs`, `bind`).
    fn fs_type(&self) -> &'static str;

    /// Name of the filesystem mounted at `path`.
    fn dataset_for_mountpoint(&self, ctx: &OpContext, path: &Path) -> BackendResult<String>;

    /// Create an empty filesystem.
    fn create_filesystem(
        &self,
        ctx: &OpContext,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()>;

    /// Create `dataset@name`.
    fn create_snapshot(&self, ctx: &OpContext, snapshot: &str) -> BackendResult<()>;

    /// Create a writable filesystem sharing all blocks with `snapshot`.
    fn clone_snapshot(
        &self,
        ctx: &OpContext,
        snapshot: &str,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()>;

    /// Rename a filesystem, keeping its origin and its snapshots.
    fn rename(&self, ctx: &OpContext, from: &str, to: &str) -> BackendResult<()>;

    /// Destroy a filesystem or snapshot.
    fn destroy(&self, ctx: &OpContext, name: &str, flags: DestroyFlags) -> BackendResult<()>;

    /// Read a property. `Ok(None)` means the property is unset (`-`).
    fn get_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
    ) -> BackendResult<Option<String>>;

    /// Set a property.
    fn set_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
        value: &str,
    ) -> BackendResult<()>;

    /// Mount a filesystem at its mountpoint.
    fn mount(&self, ctx: &OpContext, name: &str) -> BackendResult<()>;

    /// Unmount a filesystem. Not being mounted is reported as `NotFound`.
    fn unmount(&self, ctx: &OpContext, name: &str, force: bool) -> BackendResult<()>;

    /// All filesystems under `root`, `root` included.
    fn list(&self, ctx: &OpContext, root: &str) -> BackendResult<Vec<DatasetEntry>>;

    /// Whether a filesystem or snapshot exists.
    fn exists(&self, ctx: &OpContext, name: &str) -> BackendResult<bool> {
        match self.get_property(ctx, name, "type") {
            Ok(_) => Ok(true),
            Err(err) if err.is(BackendErrorKind::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Release process-wide resources.
    fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// Whether `name` is currently mounted, as reported by the backend.
pub(crate) fn is_mounted(backend: &dyn Backend, ctx: &OpContext, name: &str) -> BackendResult<bool> {
    Ok(backend.get_property(ctx, name, "mounted")?.as_deref() == Some("yes"))
}

/// Mountpoint of `name`, if it has one.
pub(crate) fn mountpoint(
    backend: &dyn Backend,
    ctx: &OpContext,
    name: &str,
) -> BackendResult<Option<PathBuf>> {
    Ok(backend
        .get_property(ctx, name, "mountpoint")?
        .filter(|value| value.starts_with('/'))
        .map(PathBuf::from))
}

/// A numeric property in bytes. Unset reads as zero.
pub(crate) fn numeric_property(
    backend: &dyn Backend,
    ctx: &OpContext,
    name: &str,
    property: &str,
) -> BackendResult<u64> {
    match backend.get_property(ctx, name, property)? {
        None => Ok(0),
        Some(value) => value.trim().parse().map_err(|_| {
            BackendError::new(
                BackendErrorKind::Unknown,
                name,
                format!("property {property} is not numeric: {value:?}"),
            )
        }),
    }
}

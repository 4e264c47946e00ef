//! Mount descriptors and mount operations.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_common::StratumResult;

/// Instructions for making a layer visible to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Filesystem type (`zfs`, `bind`).
    pub fs_type: String,
    /// Backend-specific source: a dataset name for `zfs`, a directory for `bind`.
    pub source: String,
    /// Where the layer's data is visible on the host.
    pub path: PathBuf,
    /// Mount options.
    pub options: Vec<String>,
    /// Whether the layer must not be written.
    pub readonly: bool,
}

impl Mount {
    /// Translate a backend dataset and its mountpoint into a descriptor.
    ///
    /// Native `zfs` mounts name the dataset as their source. Every other
    /// backend is exposed as a recursive bind of its mountpoint.
    #[must_use]
    pub fn for_dataset(fs_type: &str, dataset: &str, mountpoint: &Path, readonly: bool) -> Self {
        let access = if readonly { "ro" } else { "rw" }.to_string();
        match fs_type {
            "zfs" => Self {
                fs_type: "zfs".to_string(),
                source: dataset.to_string(),
                path: mountpoint.to_path_buf(),
                options: vec![access],
                readonly,
            },
            _ => Self {
                fs_type: "bind".to_string(),
                source: mountpoint.display().to_string(),
                path: mountpoint.to_path_buf(),
                options: vec!["rbind".to_string(), access],
                readonly,
            },
        }
    }

    /// Options joined the way `mount -o` expects them.
    #[must_use]
    pub fn options_string(&self) -> String {
        self.options.join(",")
    }

    /// Bind the layer's data onto `target`, read-only if the descriptor says so.
    ///
    /// # Errors
    ///
    /// Returns an error if any mount syscall fails.
    pub fn bind(&self, target: &Path) -> StratumResult<()> {
        bind_mount(&self.path, target, self.readonly)
    }
}

/// Bind mount a path.
///
/// # Errors
///
/// Returns an I/O error if any of the mount calls fail.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path, readonly: bool) -> StratumResult<()> {
    use rustix::mount::{
        MountFlags, MountPropagationFlags, mount_bind_recursive, mount_change, mount_remount,
    };

    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        readonly,
        "Creating bind mount"
    );

    mount_bind_recursive(source, target).map_err(|e| stratum_common::StratumError::Io(e.into()))?;

    // Make it private to prevent propagation
    mount_change(target, MountPropagationFlags::PRIVATE)
        .map_err(|e| stratum_common::StratumError::Io(e.into()))?;

    if readonly {
        mount_remount(target, MountFlags::BIND | MountFlags::RDONLY, "")
            .map_err(|e| stratum_common::StratumError::Io(e.into()))?;
    }

    tracing::debug!(target = %target.display(), "Bind mount created");
    Ok(())
}

/// Bind mount a path.
///
/// # Errors
///
/// Always returns [`StratumError::Unavailable`](stratum_common::StratumError::Unavailable) off Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path, _readonly: bool) -> StratumResult<()> {
    Err(stratum_common::StratumError::Unavailable {
        detail: "bind mounts require Linux".to_string(),
    })
}

/// Detach a mount created by [`bind_mount`].
///
/// # Errors
///
/// Returns an I/O error if the unmount fails.
#[cfg(target_os = "linux")]
pub fn release(target: &Path) -> StratumResult<()> {
    use rustix::mount::{UnmountFlags, unmount};

    tracing::debug!(target = %target.display(), "Releasing mount");

    unmount(target, UnmountFlags::DETACH)
        .map_err(|e| stratum_common::StratumError::Io(e.into()))?;

    Ok(())
}

/// Detach a mount created by [`bind_mount`].
///
/// # Errors
///
/// Always returns [`StratumError::Unavailable`](stratum_common::StratumError::Unavailable) off Linux.
#[cfg(not(target_os = "linux"))]
pub fn release(_target: &Path) -> StratumResult<()> {
    Err(stratum_common::StratumError::Unavailable {
        detail: "unmount requires Linux".to_string(),
    })
}

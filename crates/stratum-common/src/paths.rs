//! Standard filesystem paths for Stratum.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory, the mountpoint of the backend root dataset.
pub static STRATUM_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("STRATUM_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/stratum/zfs"))
});

/// Standard paths used by the snapshotter.
///
/// Layer datasets inherit their mountpoints from the root dataset, so
/// every layer of kind `kind` is visible at `<root>/<kind>/<component>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratumPaths {
    /// Root directory (default: /var/lib/stratum/zfs).
    pub root: PathBuf,
}

impl StratumPaths {
    /// Create paths with the default location.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding every layer of one kind.
    #[must_use]
    pub fn kind_dir(&self, kind: &str) -> PathBuf {
        self.root.join(kind)
    }

    /// Mountpoint of a single layer dataset.
    #[must_use]
    pub fn layer_dir(&self, kind: &str, component: &str) -> PathBuf {
        self.kind_dir(kind).join(component)
    }

    /// State file kept by the file-backed fake backend.
    #[must_use]
    pub fn fake_state(&self) -> PathBuf {
        self.root.join(".stratum-fake.json")
    }

    /// Snapshot store kept by the file-backed fake backend.
    #[must_use]
    pub fn fake_snapshots(&self) -> PathBuf {
        self.root.join(".stratum-snapshots")
    }

    /// Create the root directory.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

impl Default for StratumPaths {
    fn default() -> Self {
        Self {
            root: STRATUM_ROOT.clone(),
        }
    }
}

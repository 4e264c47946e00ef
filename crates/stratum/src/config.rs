//! Snapshotter configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratum_common::{StratumError, StratumPaths, StratumResult};

use crate::backend::{Backend, FakeBackend, ZfsCli};

/// Which copy-on-write backend to drive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The `zfs` command-line tool.
    #[default]
    Zfs,
    /// Directory-tree emulation, for tests and development.
    Fake,
}

/// Snapshotter configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotterConfig {
    /// Mountpoint of the backend root dataset.
    pub root: PathBuf,
    /// Path or name of the `zfs` binary.
    pub zfs_binary: PathBuf,
    /// Backend implementation.
    pub backend: BackendKind,
}

impl Default for SnapshotterConfig {
    fn default() -> Self {
        Self {
            root: StratumPaths::new().root,
            zfs_binary: PathBuf::from("zfs"),
            backend: BackendKind::Zfs,
        }
    }
}

impl SnapshotterConfig {
    /// Load a configuration from a TOML file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> StratumResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| StratumError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the `zfs` binary.
    #[must_use]
    pub fn with_zfs_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.zfs_binary = binary.into();
        self
    }

    /// Set the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Standard paths under the configured root.
    #[must_use]
    pub fn paths(&self) -> StratumPaths {
        StratumPaths::with_root(&self.root)
    }

    /// Instantiate the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the fake backend's state cannot be opened.
    pub fn build_backend(&self) -> StratumResult<Arc<dyn Backend>> {
        Ok(match self.backend {
            BackendKind::Zfs => Arc::new(ZfsCli::new(&self.zfs_binary)),
            BackendKind::Fake => Arc::new(FakeBackend::open(&self.root)?),
        })
    }
}

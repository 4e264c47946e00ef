//! Layer metadata types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_common::LayerKey;

/// Lifecycle kind of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Read-only active layer, created by View. Cannot be committed.
    View,
    /// Mutable layer created by Prepare.
    Active,
    /// Immutable layer produced by Commit.
    Committed,
}

impl LayerKind {
    /// Every kind, in the order lookups check them.
    pub const ALL: [Self; 3] = [Self::Active, Self::View, Self::Committed];

    /// Backend container name holding layers of this kind.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Active => "active",
            Self::Committed => "committed",
        }
    }

    /// Inverse of [`LayerKind::dir_name`].
    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.dir_name() == name)
    }

    /// Whether layers of this kind are mounted read-only.
    #[must_use]
    pub const fn is_readonly(self) -> bool {
        matches!(self, Self::View | Self::Committed)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Metadata returned by Stat and Walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Layer key.
    pub key: LayerKey,
    /// Lifecycle kind.
    pub kind: LayerKind,
    /// Committed parent, if any.
    pub parent: Option<LayerKey>,
    /// Creation time reported by the backend.
    pub created: Option<DateTime<Utc>>,
}

/// Storage consumed exclusively by one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Bytes not shared with the parent layer.
    pub size_bytes: u64,
    /// Net number of filesystem objects added on top of the parent.
    pub inode_count: u64,
}

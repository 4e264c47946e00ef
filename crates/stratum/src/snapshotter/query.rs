//! Stat, Walk, Mounts and Usage.

use std::vec;

use chrono::{DateTime, Utc};
use stratum_common::StratumResult;

use super::Snapshotter;
use crate::backend::DatasetEntry;
use crate::context::OpContext;
use crate::layer::{LayerInfo, Usage};
use crate::mount::Mount;
use crate::naming::Naming;
use crate::usage::UsageAccountant;

/// Lazy sequence of every layer known to the backend.
///
/// The dataset list is read once when the walk starts. Entries are turned
/// into [`LayerInfo`] as the iterator advances, so layers created or removed
/// afterwards may or may not be reflected.
#[derive(Debug)]
pub struct Walk {
    naming: Naming,
    entries: vec::IntoIter<DatasetEntry>,
}

impl Iterator for Walk {
    type Item = LayerInfo;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            let Some((kind, key)) = self.naming.parse_dataset(&entry.name) else {
                continue;
            };
            return Some(LayerInfo {
                key,
                kind,
                parent: entry
                    .origin
                    .as_deref()
                    .and_then(|origin| self.naming.parse_anchor(origin)),
                created: entry.created.and_then(timestamp),
            });
        }
        None
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

impl Snapshotter {
    /// Metadata of layer `key`.
    ///
    /// # Errors
    ///
    /// Returns [`stratum_common::StratumError::NotFound`] if `key` does not exist.
    pub fn stat(&self, ctx: &OpContext, key: &str) -> StratumResult<LayerInfo> {
        self.ensure_open(ctx, "stat")?;
        let key = self.parse_key(key)?;
        let _locks = self.locks.lock(&[Naming::lock_name(&key)]);

        let kind = self.locate_existing(ctx, &key)?;
        let dataset = self.naming.dataset(kind, &key);
        let parent = self.parent_dataset(ctx, &dataset)?;
        let created = self
            .backend
            .get_property(ctx, &dataset, "creation")?
            .and_then(|value| value.trim().parse().ok())
            .and_then(timestamp);

        Ok(LayerInfo {
            key,
            kind,
            parent: parent.and_then(|origin| self.naming.parse_anchor(&origin)),
            created,
        })
    }

    /// Enumerate every layer.
    ///
    /// No per-key lock is held while the walk is consumed.
    ///
    /// # Errors
    ///
    /// Returns the classified backend error if the dataset list cannot be read.
    pub fn walk(&self, ctx: &OpContext) -> StratumResult<Walk> {
        self.ensure_open(ctx, "walk")?;
        let entries = self.backend.list(ctx, self.naming.root())?;
        Ok(Walk {
            naming: self.naming.clone(),
            entries: entries.into_iter(),
        })
    }

    /// Mount descriptor of layer `key`, mounting it again if it was unmounted externally.
    ///
    /// # Errors
    ///
    /// Returns [`stratum_common::StratumError::NotFound`] if `key` does not exist.
    pub fn mounts(&self, ctx: &OpContext, key: &str) -> StratumResult<Mount> {
        self.ensure_open(ctx, "mounts")?;
        let key = self.parse_key(key)?;
        let _locks = self.locks.lock(&[Naming::lock_name(&key)]);

        let kind = self.locate_existing(ctx, &key)?;
        self.mount_for(ctx, kind, &self.naming.dataset(kind, &key))
    }

    /// Storage used exclusively by layer `key`.
    ///
    /// # Errors
    ///
    /// Returns [`stratum_common::StratumError::NotFound`] if `key` does not exist.
    pub fn usage(&self, ctx: &OpContext, key: &str) -> StratumResult<Usage> {
        self.ensure_open(ctx, "usage")?;
        let key = self.parse_key(key)?;
        let _locks = self.locks.lock(&[Naming::lock_name(&key)]);

        let kind = self.locate_existing(ctx, &key)?;
        let dataset = self.naming.dataset(kind, &key);
        let parent = self
            .parent_dataset(ctx, &dataset)?
            .and_then(|origin| origin.split_once('@').map(|(ds, _)| ds.to_string()));

        UsageAccountant::new(self.backend()).measure(ctx, kind, &dataset, parent.as_deref())
    }

    /// The `origin` snapshot of `dataset`, if it is a clone.
    fn parent_dataset(&self, ctx: &OpContext, dataset: &str) -> StratumResult<Option<String>> {
        Ok(self.backend.get_property(ctx, dataset, "origin")?)
    }
}

//! Prepare, View, Commit and Remove.

use stratum_common::{LayerKey, StratumError, StratumResult};

use super::Snapshotter;
use crate::backend::{BackendErrorKind, DestroyFlags};
use crate::context::OpContext;
use crate::layer::LayerKind;
use crate::mount::Mount;
use crate::naming::{Naming, anchor_of};

impl Snapshotter {
    /// Create a writable layer `key`, cloned from the committed layer `parent` if given.
    ///
    /// # Errors
    ///
    /// - [`StratumError::AlreadyExists`] if `key` is in use.
    /// - [`StratumError::NotFound`] if `parent` is not a committed layer.
    /// - [`StratumError::InvalidKey`] if either key breaks the naming rules.
    /// - Any classified backend error.
    pub fn prepare(
        &self,
        ctx: &OpContext,
        key: &str,
        parent: Option<&str>,
    ) -> StratumResult<Mount> {
        self.create(ctx, LayerKind::Active, key, parent)
    }

    /// Like [`Snapshotter::prepare`], but the layer is read-only and cannot be committed.
    ///
    /// # Errors
    ///
    /// Same as [`Snapshotter::prepare`].
    pub fn view(&self, ctx: &OpContext, key: &str, parent: Option<&str>) -> StratumResult<Mount> {
        self.create(ctx, LayerKind::View, key, parent)
    }

    fn create(
        &self,
        ctx: &OpContext,
        kind: LayerKind,
        key: &str,
        parent: Option<&str>,
    ) -> StratumResult<Mount> {
        let operation = if kind == LayerKind::View { "view" } else { "prepare" };
        self.ensure_open(ctx, operation)?;
        let key = self.parse_key(key)?;
        let parent = parent.map(|p| self.parse_key(p)).transpose()?;

        let mut names = vec![Naming::lock_name(&key)];
        names.extend(parent.as_ref().map(Naming::lock_name));
        let _locks = self.locks.lock(&names);

        if self.locate(ctx, &key)?.is_some() {
            return Err(StratumError::already_exists(key.as_str()));
        }

        let dataset = self.naming.dataset(kind, &key);
        let properties: &[(&str, &str)] = if kind.is_readonly() {
            &[("readonly", "on")]
        } else {
            &[]
        };

        let created = match &parent {
            Some(parent) => {
                let parent_dataset = self.naming.dataset(LayerKind::Committed, parent);
                if !self.backend.exists(ctx, &parent_dataset)? {
                    return Err(StratumError::not_found(parent.as_str()));
                }
                let anchor = self.ensure_anchor(ctx, &parent_dataset)?;
                self.backend
                    .clone_snapshot(ctx, &anchor, &dataset, properties)
            }
            None => self.backend.create_filesystem(ctx, &dataset, properties),
        };
        if let Err(err) = created {
            // A cancelled call may have finished on the backend side.
            if err.is(BackendErrorKind::Cancelled) {
                self.discard(&dataset);
            }
            return Err(err.into());
        }

        let mount = match self.mount_for(ctx, kind, &dataset) {
            Ok(mount) => mount,
            Err(err) => {
                self.discard(&dataset);
                return Err(err);
            }
        };

        // The key is live again, so an earlier commit of it no longer counts.
        self.committed.lock().remove(&key);

        tracing::info!(
            key = %key,
            parent = parent.as_ref().map(LayerKey::as_str),
            kind = %kind,
            dataset = %dataset,
            "Layer prepared"
        );
        Ok(mount)
    }

    /// Turn the active layer `key` into the committed layer `name`.
    ///
    /// The dataset is renamed, which keeps its clone origin, then made
    /// read-only and given its anchor snapshot.
    ///
    /// # Errors
    ///
    /// - [`StratumError::NotFound`] if `key` does not exist.
    /// - [`StratumError::InvalidState`] if `key` is a view or was already committed.
    /// - [`StratumError::AlreadyExists`] if `name` is in use.
    /// - Any classified backend error.
    pub fn commit(&self, ctx: &OpContext, name: &str, key: &str) -> StratumResult<()> {
        self.ensure_open(ctx, "commit")?;
        let target = self.parse_key(name)?;
        let source = self.parse_key(key)?;
        let _locks = self
            .locks
            .lock(&[Naming::lock_name(&source), Naming::lock_name(&target)]);

        if let Some(earlier) = self.committed.lock().get(&source) {
            return Err(StratumError::invalid_state(
                source.as_str(),
                format!("already committed as {earlier}"),
            ));
        }

        match self.locate(ctx, &source)? {
            None => return Err(StratumError::not_found(source.as_str())),
            Some(LayerKind::View) => {
                return Err(StratumError::invalid_state(
                    source.as_str(),
                    "view layers cannot be committed",
                ));
            }
            Some(LayerKind::Committed) => {
                return Err(StratumError::invalid_state(
                    source.as_str(),
                    "layer is already committed",
                ));
            }
            Some(LayerKind::Active) => {}
        }
        if self.locate(ctx, &target)?.is_some() {
            return Err(StratumError::already_exists(target.as_str()));
        }

        let from = self.naming.dataset(LayerKind::Active, &source);
        let to = self.naming.dataset(LayerKind::Committed, &target);

        self.unmount_tolerant(ctx, &from)?;
        if let Err(err) = self.backend.rename(ctx, &from, &to) {
            // A cancelled rename may still have completed on the backend side.
            let landed = err.is(BackendErrorKind::Cancelled)
                && self
                    .backend
                    .exists(&OpContext::background(), &to)
                    .unwrap_or(false);
            if landed {
                self.undo_commit(&from, &to);
            } else {
                self.remount_quietly(&from);
            }
            return Err(err.into());
        }

        if let Err(err) = self.seal(ctx, &to) {
            self.undo_commit(&from, &to);
            return Err(err);
        }

        self.committed.lock().insert(source.clone(), target.clone());
        tracing::info!(key = %source, target = %target, dataset = %to, "Layer committed");
        Ok(())
    }

    /// Make a freshly renamed dataset immutable and clonable.
    fn seal(&self, ctx: &OpContext, dataset: &str) -> StratumResult<()> {
        self.backend.set_property(ctx, dataset, "readonly", "on")?;
        self.ensure_anchor(ctx, dataset)?;
        self.mount_for(ctx, LayerKind::Committed, dataset)?;
        Ok(())
    }

    fn undo_commit(&self, from: &str, to: &str) {
        let ctx = OpContext::background();
        let warn = |step: &str, err: &dyn std::fmt::Display| {
            tracing::warn!(dataset = to, step, error = %err, "Commit rollback failed");
        };

        if let Err(err) = self.unmount_tolerant(&ctx, to) {
            warn("unmount", &err);
        }
        match self
            .backend
            .destroy(&ctx, &anchor_of(to), DestroyFlags::default())
        {
            Err(err) if !err.is(BackendErrorKind::NotFound) => warn("destroy anchor", &err),
            _ => {}
        }
        if let Err(err) = self.backend.set_property(&ctx, to, "readonly", "off") {
            warn("clear readonly", &err);
        }
        if let Err(err) = self.backend.rename(&ctx, to, from) {
            warn("rename back", &err);
            return;
        }
        self.remount_quietly(from);
    }

    fn remount_quietly(&self, dataset: &str) {
        let ctx = OpContext::background();
        if let Err(err) = self.mount_for(&ctx, LayerKind::Active, dataset) {
            tracing::warn!(dataset, error = %err, "Failed to remount after rollback");
        }
    }

    /// Destroy layer `key` and the snapshots it owns.
    ///
    /// Already-unmounted datasets are fine, so a Remove that failed halfway
    /// can be retried.
    ///
    /// # Errors
    ///
    /// - [`StratumError::NotFound`] if `key` does not exist.
    /// - [`StratumError::HasChildren`] if other layers were cloned from it.
    /// - Any classified backend error.
    pub fn remove(&self, ctx: &OpContext, key: &str) -> StratumResult<()> {
        self.ensure_open(ctx, "remove")?;
        let key = self.parse_key(key)?;
        let _locks = self.locks.lock(&[Naming::lock_name(&key)]);

        let kind = self.locate_existing(ctx, &key)?;
        let dataset = self.naming.dataset(kind, &key);

        if kind == LayerKind::Committed {
            let children = self.clone_count(ctx, &dataset)?;
            if children > 0 {
                return Err(StratumError::HasChildren {
                    key: key.to_string(),
                    children,
                });
            }
        }

        self.unmount_tolerant(ctx, &dataset)?;
        self.backend.destroy(
            ctx,
            &dataset,
            DestroyFlags {
                recursive: true,
                force_unmount: true,
            },
        )?;

        if kind == LayerKind::Committed {
            // Sources committed into this layer no longer count as committed.
            self.committed.lock().retain(|_, target| *target != key);
        }

        tracing::info!(key = %key, kind = %kind, dataset = %dataset, "Layer removed");
        Ok(())
    }
}

//! Async snapshotter contract.
//!
//! Hosts that drive the snapshotter from an async runtime use
//! [`SnapshotService`]. [`BlockingService`] runs each call on tokio's
//! blocking pool; dropping the returned future cancels the in-flight
//! backend call.

use std::sync::Arc;

use async_trait::async_trait;
use stratum_common::{StratumError, StratumResult};
use tokio_util::sync::CancellationToken;

use crate::context::OpContext;
use crate::layer::{LayerInfo, Usage};
use crate::mount::Mount;
use crate::snapshotter::Snapshotter;

/// Snapshotter operations as seen by a container runtime.
#[async_trait]
pub trait SnapshotService: Send + Sync {
    /// Create a writable layer.
    async fn prepare(&self, key: &str, parent: Option<&str>) -> StratumResult<Mount>;

    /// Create a read-only, non-committable layer.
    async fn view(&self, key: &str, parent: Option<&str>) -> StratumResult<Mount>;

    /// Commit an active layer under a new name.
    async fn commit(&self, name: &str, key: &str) -> StratumResult<()>;

    /// Remove a layer.
    async fn remove(&self, key: &str) -> StratumResult<()>;

    /// Layer metadata.
    async fn stat(&self, key: &str) -> StratumResult<LayerInfo>;

    /// Every layer.
    async fn walk(&self) -> StratumResult<Vec<LayerInfo>>;

    /// Mount descriptor of an existing layer.
    async fn mounts(&self, key: &str) -> StratumResult<Mount>;

    /// Exclusive usage of a layer.
    async fn usage(&self, key: &str) -> StratumResult<Usage>;

    /// Release process-wide resources.
    async fn close(&self) -> StratumResult<()>;
}

/// [`SnapshotService`] over a [`Snapshotter`], one blocking task per call.
#[derive(Debug, Clone)]
pub struct BlockingService {
    inner: Arc<Snapshotter>,
}

impl BlockingService {
    /// Wrap a snapshotter.
    #[must_use]
    pub fn new(snapshotter: Snapshotter) -> Self {
        Self {
            inner: Arc::new(snapshotter),
        }
    }

    /// The wrapped snapshotter.
    #[must_use]
    pub fn snapshotter(&self) -> &Arc<Snapshotter> {
        &self.inner
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> StratumResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Snapshotter, &OpContext) -> StratumResult<T> + Send + 'static,
    {
        let token = CancellationToken::new();
        // Cancels the in-flight backend call if the caller drops this future.
        let guard = token.clone().drop_guard();
        let inner = Arc::clone(&self.inner);
        let ctx = OpContext::with_cancel(token);

        let result = tokio::task::spawn_blocking(move || f(&inner, &ctx))
            .await
            .map_err(|e| StratumError::Unknown {
                detail: format!("{operation} task failed: {e}"),
            })?;

        let _ = guard.disarm();
        result
    }
}

#[async_trait]
impl SnapshotService for BlockingService {
    async fn prepare(&self, key: &str, parent: Option<&str>) -> StratumResult<Mount> {
        let (key, parent) = (key.to_string(), parent.map(str::to_string));
        self.run("prepare", move |s, ctx| s.prepare(ctx, &key, parent.as_deref()))
            .await
    }

    async fn view(&self, key: &str, parent: Option<&str>) -> StratumResult<Mount> {
        let (key, parent) = (key.to_string(), parent.map(str::to_string));
        self.run("view", move |s, ctx| s.view(ctx, &key, parent.as_deref()))
            .await
    }

    async fn commit(&self, name: &str, key: &str) -> StratumResult<()> {
        let (name, key) = (name.to_string(), key.to_string());
        self.run("commit", move |s, ctx| s.commit(ctx, &name, &key))
            .await
    }

    async fn remove(&self, key: &str) -> StratumResult<()> {
        let key = key.to_string();
        self.run("remove", move |s, ctx| s.remove(ctx, &key)).await
    }

    async fn stat(&self, key: &str) -> StratumResult<LayerInfo> {
        let key = key.to_string();
        self.run("stat", move |s, ctx| s.stat(ctx, &key)).await
    }

    async fn walk(&self) -> StratumResult<Vec<LayerInfo>> {
        self.run("walk", |s, ctx| Ok(s.walk(ctx)?.collect()))
            .await
    }

    async fn mounts(&self, key: &str) -> StratumResult<Mount> {
        let key = key.to_string();
        self.run("mounts", move |s, ctx| s.mounts(ctx, &key)).await
    }

    async fn usage(&self, key: &str) -> StratumResult<Usage> {
        let key = key.to_string();
        self.run("usage", move |s, ctx| s.usage(ctx, &key)).await
    }

    async fn close(&self) -> StratumResult<()> {
        self.run("close", |s, _| s.close()).await
    }
}

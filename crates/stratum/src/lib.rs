//! # Stratum
//!
//! Stratum maps stacked container filesystem layers onto a copy-on-write
//! volume manager such as ZFS. Committed layers are read-only datasets
//! carrying an anchor snapshot, and new layers are clones of that snapshot,
//! so a child never copies its parent's data.
//!
//! ## Features
//!
//! - **Lifecycle**: Prepare, View, Commit, Remove, Stat, Walk, Mounts, Usage, Close
//! - **Stateless naming**: every layer's dataset name is derived from its key
//! - **Exclusive usage**: per-layer bytes and objects, excluding inherited data
//! - **Backends**: the `zfs` command-line tool, or a directory-tree fake for tests
//!
//! ## Usage
//!
//! ```no_run
//! use stratum::{OpContext, Snapshotter, SnapshotterConfig};
//!
//! # fn example() -> stratum_common::StratumResult<()> {
//! let config = SnapshotterConfig::default().with_root("/var/lib/stratum/zfs");
//! let snapshotter = Snapshotter::open(&config)?;
//! let ctx = OpContext::background();
//!
//! // Empty root layer
//! let mount = snapshotter.prepare(&ctx, "build-1", None)?;
//! println!("populate {}", mount.path.display());
//!
//! // Freeze it and stack a container layer on top
//! snapshotter.commit(&ctx, "base", "build-1")?;
//! snapshotter.prepare(&ctx, "container-1", Some("base"))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod layer;
pub mod locks;
pub mod mount;
pub mod naming;
pub mod service;
pub mod snapshotter;
pub mod usage;

pub use config::{BackendKind, SnapshotterConfig};
pub use context::OpContext;
pub use layer::{LayerInfo, LayerKind, Usage};
pub use mount::Mount;
pub use service::{BlockingService, SnapshotService};
pub use snapshotter::{Snapshotter, Walk};
pub use tokio_util::sync::CancellationToken;

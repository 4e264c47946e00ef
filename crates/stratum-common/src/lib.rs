//! # stratum-common
//!
//! Shared utilities and types for the Stratum layer snapshotter.
//!
//! This crate provides common functionality used across all Stratum crates:
//! - The snapshotter error taxonomy
//! - Validated layer keys
//! - Standard filesystem paths

#![warn(missing_docs)]

pub mod error;
pub mod key;
pub mod paths;

pub use error::{ErrorKind, StratumError, StratumResult};
pub use key::LayerKey;
pub use paths::StratumPaths;

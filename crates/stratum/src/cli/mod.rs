//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};

use crate::config::{BackendKind, SnapshotterConfig};
use crate::layer::LayerInfo;
use crate::mount::{self, Mount};
use crate::service::{BlockingService, SnapshotService};
use crate::snapshotter::Snapshotter;

/// Stratum - copy-on-write layer snapshotter
#[derive(Parser)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Mountpoint of the backend root dataset
    #[arg(long, global = true, env = "STRATUM_ROOT")]
    pub root: Option<PathBuf>,

    /// Copy-on-write backend
    #[arg(long, global = true, value_enum, env = "STRATUM_BACKEND")]
    pub backend: Option<BackendKind>,

    /// Path to the zfs binary
    #[arg(long, global = true)]
    pub zfs_binary: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Snapshotter commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a writable layer
    Prepare {
        /// Layer key
        key: String,

        /// Committed parent layer
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Create a read-only layer
    View {
        /// Layer key
        key: String,

        /// Committed parent layer
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Commit a writable layer under a new name
    Commit {
        /// Name of the committed layer
        name: String,

        /// Key of the layer to commit
        key: String,
    },

    /// Remove a layer
    Remove {
        /// Layer key
        key: String,
    },

    /// Show layer metadata
    Stat {
        /// Layer key
        key: String,
    },

    /// List layers
    List {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show storage used exclusively by a layer
    Usage {
        /// Layer key
        key: String,
    },

    /// Show the mount descriptor of a layer
    Mounts {
        /// Layer key
        key: String,
    },

    /// Bind mount a layer onto a directory
    Mount {
        /// Layer key
        key: String,

        /// Target directory
        target: PathBuf,
    },

    /// Detach a layer mounted with `mount`
    Unmount {
        /// Target directory
        target: PathBuf,
    },
}

impl Cli {
    /// Build the snapshotter configuration from the config file and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded.
    pub fn snapshotter_config(&self) -> Result<SnapshotterConfig> {
        let mut config = match &self.config {
            Some(path) => SnapshotterConfig::from_toml_file(path)?,
            None => SnapshotterConfig::default(),
        };
        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        if let Some(backend) = self.backend {
            config = config.with_backend(backend);
        }
        if let Some(binary) = &self.zfs_binary {
            config = config.with_zfs_binary(binary);
        }
        Ok(config)
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        // Unmounting needs no snapshotter
        if let Commands::Unmount { target } = &self.command {
            return unmount(target);
        }

        let config = self.snapshotter_config()?;
        let snapshotter = tokio::task::spawn_blocking(move || Snapshotter::open(&config))
            .await?
            .map_err(|e| eyre!("Failed to open snapshotter: {}", e))?;
        let service = BlockingService::new(snapshotter);

        let result = run(&service, self.command).await;
        service
            .close()
            .await
            .map_err(|e| eyre!("Failed to close snapshotter: {}", e))?;
        result
    }
}

async fn run(service: &BlockingService, command: Commands) -> Result<()> {
    match command {
        Commands::Prepare { key, parent } => {
            let mount = service
                .prepare(&key, parent.as_deref())
                .await
                .map_err(|e| eyre!("Failed to prepare layer: {}", e))?;
            print_mount(&mount)
        }

        Commands::View { key, parent } => {
            let mount = service
                .view(&key, parent.as_deref())
                .await
                .map_err(|e| eyre!("Failed to create view: {}", e))?;
            print_mount(&mount)
        }

        Commands::Commit { name, key } => {
            service
                .commit(&name, &key)
                .await
                .map_err(|e| eyre!("Failed to commit layer: {}", e))?;
            println!("Layer {} committed as {}", key, name);
            Ok(())
        }

        Commands::Remove { key } => {
            service
                .remove(&key)
                .await
                .map_err(|e| eyre!("Failed to remove layer: {}", e))?;
            println!("Layer {} removed", key);
            Ok(())
        }

        Commands::Stat { key } => {
            let info = service
                .stat(&key)
                .await
                .map_err(|e| eyre!("Failed to stat layer: {}", e))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }

        Commands::List { format } => {
            let mut layers = service
                .walk()
                .await
                .map_err(|e| eyre!("Failed to list layers: {}", e))?;
            layers.sort_by(|a, b| a.key.cmp(&b.key));

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&layers)?),
                "table" => print_table(&layers),
                other => return Err(eyre!("Unknown format: {}", other)),
            }
            Ok(())
        }

        Commands::Usage { key } => {
            let usage = service
                .usage(&key)
                .await
                .map_err(|e| eyre!("Failed to compute usage: {}", e))?;
            println!("{}", serde_json::to_string_pretty(&usage)?);
            Ok(())
        }

        Commands::Mounts { key } => {
            let mount = service
                .mounts(&key)
                .await
                .map_err(|e| eyre!("Failed to get mounts: {}", e))?;
            print_mount(&mount)
        }

        Commands::Mount { key, target } => {
            let mount = service
                .mounts(&key)
                .await
                .map_err(|e| eyre!("Failed to get mounts: {}", e))?;
            std::fs::create_dir_all(&target)?;
            mount
                .bind(&target)
                .map_err(|e| eyre!("Failed to mount layer: {}", e))?;
            println!("Layer {} mounted at {}", key, target.display());
            Ok(())
        }

        Commands::Unmount { target } => unmount(&target),
    }
}

fn unmount(target: &Path) -> Result<()> {
    mount::release(target).map_err(|e| eyre!("Failed to unmount {}: {}", target.display(), e))?;
    println!("Unmounted {}", target.display());
    Ok(())
}

fn print_mount(mount: &Mount) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(mount)?);
    Ok(())
}

fn print_table(layers: &[LayerInfo]) {
    println!("KEY\tKIND\tPARENT\tCREATED");
    for layer in layers {
        println!(
            "{}\t{}\t{}\t{}",
            layer.key,
            layer.kind,
            layer.parent.as_ref().map_or("-", |p| p.as_str()),
            layer
                .created
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
        );
    }
}

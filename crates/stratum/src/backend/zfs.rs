//! ZFS backend driven through the `zfs` command-line tool.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use super::{Backend, BackendError, BackendErrorKind, BackendResult, DatasetEntry, DestroyFlags};
use crate::context::OpContext;

/// How often a running `zfs` child is checked for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Classify the stderr of a failed `zfs` invocation.
#[must_use]
pub fn classify_stderr(stderr: &str) -> BackendErrorKind {
    let msg = stderr.to_ascii_lowercase();
    let has = |needle: &str| msg.contains(needle);

    if has("no such pool")
        || has("permission denied")
        || has("insufficient privileges")
        || has("failed to initialize")
        || has("/dev/zfs")
        || has("currently suspended")
    {
        BackendErrorKind::Unavailable
    } else if has("does not exist") || has("not currently mounted") || has("not mounted") {
        BackendErrorKind::NotFound
    } else if has("already exists") || has("already mounted") {
        BackendErrorKind::AlreadyExists
    } else if has("busy") || has("dependent clones") || has("has children") {
        BackendErrorKind::Busy
    } else {
        BackendErrorKind::Unknown
    }
}

/// Backend that shells out to `zfs`.
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary: PathBuf,
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new("zfs")
    }
}

impl ZfsCli {
    /// Create a backend invoking `binary`.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Path of the `zfs` binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `zfs args...` and return its stdout.
    ///
    /// The child is killed if `ctx` is cancelled while it runs.
    fn run(&self, ctx: &OpContext, subject: &str, args: &[String]) -> BackendResult<String> {
        if ctx.is_cancelled() {
            return Err(BackendError::cancelled(subject));
        }

        tracing::debug!(
            binary = %self.binary.display(),
            args = %args.join(" "),
            "Running zfs"
        );

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                let kind = match e.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        BackendErrorKind::Unavailable
                    }
                    _ => BackendErrorKind::Unknown,
                };
                BackendError::new(
                    kind,
                    subject,
                    format!("failed to execute {}: {}", self.binary.display(), e),
                )
            })?;

        // Drain both pipes off-thread so a chatty child cannot block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if ctx.is_cancelled() => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::debug!(subject, "Killed zfs after cancellation");
                    return Err(BackendError::cancelled(subject));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(BackendError::new(
                        BackendErrorKind::Unknown,
                        subject,
                        format!("failed to wait for zfs: {e}"),
                    ));
                }
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if status.success() {
            Ok(stdout)
        } else {
            let detail = stderr.trim().to_string();
            Err(BackendError::new(classify_stderr(&detail), subject, detail))
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(ToString::to_string).collect()
}

fn property_args(properties: &[(&str, &str)]) -> Vec<String> {
    properties
        .iter()
        .flat_map(|(key, value)| ["-o".to_string(), format!("{key}={value}")])
        .collect()
}

fn unset(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != "-").then(|| value.to_string())
}

impl Backend for ZfsCli {
    fn fs_type(&self) -> &'static str {
        "zfs"
    }

    fn dataset_for_mountpoint(&self, ctx: &OpContext, path: &Path) -> BackendResult<String> {
        let wanted = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let subject = path.display().to_string();
        let out = self.run(
            ctx,
            &subject,
            &args(["list", "-H", "-t", "filesystem", "-o", "name,mountpoint"]),
        )?;

        out.lines()
            .filter_map(|line| line.split_once('\t'))
            .find(|(_, mountpoint)| Path::new(mountpoint) == wanted)
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorKind::Unavailable,
                    subject,
                    "no zfs filesystem is mounted at this path",
                )
            })
    }

    fn create_filesystem(
        &self,
        ctx: &OpContext,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()> {
        let mut argv = args(["create"]);
        argv.extend(property_args(properties));
        argv.push(name.to_string());
        self.run(ctx, name, &argv).map(drop)
    }

    fn create_snapshot(&self, ctx: &OpContext, snapshot: &str) -> BackendResult<()> {
        self.run(ctx, snapshot, &args(["snapshot", snapshot])).map(drop)
    }

    fn clone_snapshot(
        &self,
        ctx: &OpContext,
        snapshot: &str,
        name: &str,
        properties: &[(&str, &str)],
    ) -> BackendResult<()> {
        let mut argv = args(["clone"]);
        argv.extend(property_args(properties));
        argv.push(snapshot.to_string());
        argv.push(name.to_string());
        self.run(ctx, name, &argv).map(drop)
    }

    fn rename(&self, ctx: &OpContext, from: &str, to: &str) -> BackendResult<()> {
        self.run(ctx, from, &args(["rename", from, to])).map(drop)
    }

    fn destroy(&self, ctx: &OpContext, name: &str, flags: DestroyFlags) -> BackendResult<()> {
        let mut argv = args(["destroy"]);
        if flags.recursive {
            argv.push("-r".to_string());
        }
        if flags.force_unmount {
            argv.push("-f".to_string());
        }
        argv.push(name.to_string());
        self.run(ctx, name, &argv).map(drop)
    }

    fn get_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
    ) -> BackendResult<Option<String>> {
        let out = self.run(
            ctx,
            name,
            &args(["get", "-H", "-p", "-o", "value", property, name]),
        )?;
        Ok(unset(&out))
    }

    fn set_property(
        &self,
        ctx: &OpContext,
        name: &str,
        property: &str,
        value: &str,
    ) -> BackendResult<()> {
        let assignment = format!("{property}={value}");
        self.run(ctx, name, &args(["set", &assignment, name])).map(drop)
    }

    fn mount(&self, ctx: &OpContext, name: &str) -> BackendResult<()> {
        self.run(ctx, name, &args(["mount", name])).map(drop)
    }

    fn unmount(&self, ctx: &OpContext, name: &str, force: bool) -> BackendResult<()> {
        let argv = if force {
            args(["unmount", "-f", name])
        } else {
            args(["unmount", name])
        };
        self.run(ctx, name, &argv).map(drop)
    }

    fn list(&self, ctx: &OpContext, root: &str) -> BackendResult<Vec<DatasetEntry>> {
        let out = self.run(
            ctx,
            root,
            &args([
                "list",
                "-H",
                "-p",
                "-r",
                "-t",
                "filesystem",
                "-o",
                "name,origin,creation",
                root,
            ]),
        )?;

        Ok(out
            .lines()
            .filter_map(|line| {
                let mut fields = line.split('\t');
                let name = fields.next()?.to_string();
                let origin = fields.next().and_then(unset);
                let created = fields.next().and_then(|c| c.trim().parse().ok());
                Some(DatasetEntry {
                    name,
                    origin,
                    created,
                })
            })
            .collect())
    }
}

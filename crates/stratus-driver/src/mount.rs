//! Filesystem mount operations
//!
//! [`Mounter`] is the seam between the node service and the host: the real
//! implementation shells out to the system utilities, tests substitute an
//! in-memory one.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{DriverError, DriverResult};

const MOUNTS_FILE: &str = "/proc/self/mounts";

#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `source` on `target`, formatting the device first when it
    /// carries no filesystem.
    async fn format_and_mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> DriverResult<()>;

    /// Mount `source` on `target` without touching the device contents.
    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> DriverResult<()>;

    async fn unmount(&self, target: &Path) -> DriverResult<()>;

    async fn is_mount_point(&self, target: &Path) -> DriverResult<bool>;

    /// Create `path` and any missing parents.
    async fn make_dir(&self, path: &Path) -> DriverResult<()>;
}

/// `Mounter` backed by mount(8), umount(8), blkid(8) and mkfs
pub struct SystemMounter;

impl SystemMounter {
    /// Filesystem type currently on the device, or `None` for a blank one.
    async fn probe_fs_type(&self, source: &Path) -> DriverResult<Option<String>> {
        let output = Command::new("blkid")
            .args(["-o", "value", "-s", "TYPE"])
            .arg(source)
            .output()
            .await
            .map_err(|err| DriverError::Internal(format!("failed to run blkid: {err}")))?;

        // blkid exits 2 when the device has no recognizable content.
        if !output.status.success() {
            return Ok(None);
        }
        let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if fs_type.is_empty() { None } else { Some(fs_type) })
    }

    async fn mkfs(&self, source: &Path, fs_type: &str) -> DriverResult<()> {
        info!(device = %source.display(), fs_type, "formatting device");
        run(Command::new(format!("mkfs.{fs_type}")).arg(source)).await
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn format_and_mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> DriverResult<()> {
        match self.probe_fs_type(source).await? {
            None => self.mkfs(source, fs_type).await?,
            Some(existing) if existing != fs_type => {
                return Err(DriverError::Internal(format!(
                    "device {} already carries a {existing} filesystem, refusing to format as {fs_type}",
                    source.display()
                )));
            }
            Some(_) => debug!(device = %source.display(), fs_type, "device already formatted"),
        }
        self.mount(source, target, fs_type, options).await
    }

    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> DriverResult<()> {
        let mut command = Command::new("mount");
        if !fs_type.is_empty() {
            command.args(["-t", fs_type]);
        }
        if !options.is_empty() {
            command.args(["-o", &options.join(",")]);
        }
        command.arg(source).arg(target);
        info!(source = %source.display(), target = %target.display(), fs_type, "mounting");
        run(&mut command).await
    }

    async fn unmount(&self, target: &Path) -> DriverResult<()> {
        info!(target = %target.display(), "unmounting");
        run(Command::new("umount").arg(target)).await
    }

    async fn is_mount_point(&self, target: &Path) -> DriverResult<bool> {
        let mounts = tokio::fs::read_to_string(MOUNTS_FILE)
            .await
            .map_err(|err| {
                DriverError::Internal(format!("failed to read {MOUNTS_FILE}: {err}"))
            })?;
        Ok(mounts_contain(&mounts, target))
    }

    async fn make_dir(&self, path: &Path) -> DriverResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(|err| {
            DriverError::Internal(format!("failed to create {}: {err}", path.display()))
        })
    }
}

async fn run(command: &mut Command) -> DriverResult<()> {
    let output = command
        .output()
        .await
        .map_err(|err| DriverError::Internal(format!("failed to spawn command: {err}")))?;
    if output.status.success() {
        return Ok(());
    }
    Err(DriverError::Internal(format!(
        "command failed ({}): {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

/// Whether `target` appears as a mount point in mounts-file `content`.
///
/// Field two of each line is the mount point, with spaces escaped as `\040`.
fn mounts_contain(content: &str, target: &Path) -> bool {
    let needle = target.to_string_lossy().replace(' ', "\\040");
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| mount_point == needle)
}

//! Block-device discovery
//!
//! The control plane reports the device name a volume shows up as on its
//! node ("vdb"); this maps that name to the `/dev` path, refusing names
//! the kernel does not list as block devices.

use std::path::{Path, PathBuf};

use crate::error::{DriverError, DriverResult};

pub(crate) const SYS_BLOCK: &str = "/sys/block";
pub(crate) const DEV: &str = "/dev";

/// Resolve a control-plane device name to its path under `dev`.
///
/// # Errors
///
/// [`DriverError::NotFound`] when the kernel does not know the device.
pub(crate) async fn resolve(
    sys_block: &Path,
    dev: &Path,
    device_name: &str,
) -> DriverResult<PathBuf> {
    // Path traversal through a control-plane-supplied name must not escape
    // /dev.
    if device_name.is_empty() || device_name.contains('/') {
        return Err(DriverError::invalid(format!(
            "unusable device name: {device_name:?}"
        )));
    }

    let sys_entry = sys_block.join(device_name);
    match tokio::fs::metadata(&sys_entry).await {
        Ok(_) => Ok(dev.join(device_name)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(DriverError::NotFound(
            format!("no block device named {device_name}"),
        )),
        Err(err) => Err(DriverError::Internal(format!(
            "failed to stat {}: {err}",
            sys_entry.display()
        ))),
    }
}

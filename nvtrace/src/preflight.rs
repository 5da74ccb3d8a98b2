//! Pre-flight checks for nvtrace
//!
//! Validates inputs and privileges before touching a trace source or a device.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Result};
use std::path::Path;

/// Checks run before a replay against hardware
pub fn run_replay_checks(input: &Path, device: Option<&Path>) -> Result<()> {
    check_input_exists(input, "Binary log")?;
    check_privileges()?;
    if let Some(device) = device {
        check_device_node(device)?;
    }
    Ok(())
}

/// Check if running with sufficient privileges for NVMe passthrough
pub fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }
    bail!(
        "Permission denied: nvtrace requires root privileges to issue NVMe commands.\n\n\
         Run with: sudo nvtrace replay ...\n\
         or use --dry-run to replay against an in-memory device"
    );
}

/// Check that an input file exists and is a regular file
pub fn check_input_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!(
            "{what} not found: {}\n\n\
             Make sure the path is correct and the file exists.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!("Not a file: {}", path.display());
    }
    Ok(())
}

/// Check that a device path names an NVMe namespace block device
fn check_device_node(device: &Path) -> Result<()> {
    let is_namespace = device
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(crate::device::passthru::parse_block_name)
        .is_some();
    if !is_namespace {
        bail!(
            "Not an NVMe namespace: {}\n\n\
             --device expects a block device such as /dev/nvme0n1",
            device.display()
        );
    }
    if !device.exists() {
        bail!(
            "Device not found: {}\n\n\
             List NVMe namespaces with: ls /sys/block | grep nvme",
            device.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_not_found() {
        let result = check_input_exists(Path::new("/nonexistent/run.bin"), "Binary log");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Binary log not found"));
    }

    #[test]
    fn test_input_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_input_exists(dir.path(), "Trace file").unwrap_err().to_string();
        assert!(err.contains("Not a file"));
    }

    #[test]
    fn test_device_name_checked() {
        let err = check_device_node(Path::new("/dev/sda")).unwrap_err().to_string();
        assert!(err.contains("Not an NVMe namespace"));
    }

    #[test]
    fn test_missing_device() {
        let err = check_device_node(Path::new("/nonexistent/nvme9n9")).unwrap_err().to_string();
        assert!(err.contains("Device not found"));
    }
}

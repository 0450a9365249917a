//! Kernel parameter access through `/proc/sys`.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{NetError, Result};

/// Enables IPv4 forwarding for the calling thread's network namespace.
///
/// # Errors
///
/// Returns an error if the sysctl cannot be read or written.
pub fn enable_ipv4_forwarding() -> Result<()> {
    ensure_value(l4lb_constants::net::IPV4_FORWARD_SYSCTL, "1")
}

/// Writes `value` to the sysctl file at `path` unless it already holds it.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written.
pub fn ensure_value(path: impl AsRef<Path>, value: &str) -> Result<()> {
    let path = path.as_ref();
    let current = fs::read_to_string(path)
        .map_err(|e| NetError::Sysctl(format!("failed to read {}: {e}", path.display())))?;

    if current.trim() == value {
        return Ok(());
    }

    fs::write(path, value)
        .map_err(|e| NetError::Sysctl(format!("failed to write {}: {e}", path.display())))?;
    debug!(sysctl = %path.display(), value, "updated sysctl");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_value_writes_when_different() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ip_forward");
        fs::write(&path, "0\n").unwrap();

        ensure_value(&path, "1").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }

    #[test]
    fn test_ensure_value_leaves_matching_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ip_forward");
        fs::write(&path, "1\n").unwrap();

        ensure_value(&path, "1").unwrap();
        // Untouched: the trailing newline survives.
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n");
    }

    #[test]
    fn test_ensure_value_missing_file() {
        let err = ensure_value("/nonexistent/sysctl", "1").unwrap_err();
        assert!(matches!(err, NetError::Sysctl(_)));
    }
}

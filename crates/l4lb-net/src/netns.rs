//! Network namespace handles and scoped namespace execution.
//!
//! `setns(2)` switches the namespace of the calling *thread* only. Work that
//! must happen inside a container namespace therefore runs through
//! [`with_netns_path`], which spawns a dedicated thread, moves it into the
//! target namespace, runs the closure and restores the original namespace
//! before the thread exits. The thread is never handed back to anyone else,
//! so concurrent invocations in one process each get their own pinned
//! context and no thread is left stranded in a foreign namespace.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, error};

use crate::error::{NetError, Result};

const NSFS_MAGIC: i64 = 0x6e73_6673;
const PROC_SUPER_MAGIC: i64 = 0x9fa0;

/// An open network namespace.
#[derive(Debug)]
pub struct NetNs {
    file: File,
    path: PathBuf,
}

impl NetNs {
    /// Opens the network namespace of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace file cannot be opened.
    pub fn current() -> Result<Self> {
        let path = PathBuf::from("/proc/thread-self/ns/net");
        let path = if path.exists() {
            path
        } else {
            let tid = unsafe { libc::syscall(libc::SYS_gettid) };
            PathBuf::from(format!("/proc/self/task/{tid}/ns/net"))
        };

        let file = File::open(&path).map_err(|e| {
            NetError::Namespace(format!("failed to open current namespace {}: {e}", path.display()))
        })?;
        Ok(Self { file, path })
    }

    /// Opens the network namespace at `path`, which must be a namespace file
    /// (a bind mount under `/var/run/netns`, or `/proc/<pid>/ns/net`).
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or is not a namespace.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure_namespace_file(path)?;

        let file = File::open(path).map_err(|e| {
            NetError::Namespace(format!("failed to open namespace {}: {e}", path.display()))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path this namespace was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the calling thread into this namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if `setns(2)` fails.
    pub fn enter(&self) -> Result<()> {
        let ret = unsafe { libc::setns(self.file.as_raw_fd(), libc::CLONE_NEWNET) };
        if ret < 0 {
            return Err(NetError::Namespace(format!(
                "failed to enter namespace {}: {}",
                self.path.display(),
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl AsRawFd for NetNs {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for NetNs {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Puts the thread back into its original namespace when dropped.
struct RestoreGuard<'a> {
    original: &'a NetNs,
    armed: bool,
}

impl<'a> RestoreGuard<'a> {
    const fn new(original: &'a NetNs) -> Self {
        Self {
            original,
            armed: true,
        }
    }

    fn restore(mut self) -> Result<()> {
        self.armed = false;
        self.original.enter()
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.original.enter() {
                error!(error = %e, "failed to restore original network namespace");
            }
        }
    }
}

/// Runs `f` inside the network namespace at `path`.
///
/// `f` receives the namespace the work was started from (the host side),
/// which is what a veth peer is moved into. The closure runs on its own
/// thread; the original namespace is restored on every exit path, including
/// errors and panics, before that thread terminates.
///
/// # Errors
///
/// Returns an error if the namespace cannot be opened or entered, if `f`
/// fails, or if the original namespace cannot be restored.
pub fn with_netns_path<T, F>(path: impl AsRef<Path>, f: F) -> Result<T>
where
    F: FnOnce(&NetNs) -> Result<T> + Send,
    T: Send,
{
    let target = NetNs::from_path(path)?;

    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("l4lb-netns".to_string())
            .spawn_scoped(scope, || run_in(&target, f))
            .map_err(|e| NetError::Namespace(format!("failed to spawn namespace worker: {e}")))?;

        worker
            .join()
            .map_err(|_| NetError::Namespace("namespace worker panicked".to_string()))?
    })
}

fn run_in<T, F>(target: &NetNs, f: F) -> Result<T>
where
    F: FnOnce(&NetNs) -> Result<T>,
{
    let original = NetNs::current()?;
    target.enter()?;
    debug!(netns = %target.path().display(), "entered network namespace");

    let guard = RestoreGuard::new(&original);
    let result = f(&original);
    guard.restore()?;

    result
}

fn ensure_namespace_file(path: &Path) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| NetError::Config(e.to_string()))?;
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if ret < 0 {
        return Err(NetError::Namespace(format!(
            "failed to stat namespace {}: {}",
            path.display(),
            io::Error::last_os_error()
        )));
    }

    #[allow(clippy::cast_lossless, clippy::unnecessary_cast)]
    let fs_type = stat.f_type as i64;
    if fs_type != NSFS_MAGIC && fs_type != PROC_SUPER_MAGIC {
        return Err(NetError::Namespace(format!(
            "{} is not a network namespace (unknown FS magic {fs_type:#x})",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_namespace_opens() {
        let ns = NetNs::current().unwrap();
        assert!(ns.as_raw_fd() >= 0);
    }

    #[test]
    fn test_rejects_regular_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = NetNs::from_path(file.path()).unwrap_err();
        assert!(matches!(err, NetError::Namespace(_)));
    }

    #[test]
    fn test_rejects_missing_path() {
        let err = NetNs::from_path("/nonexistent/netns/path").unwrap_err();
        assert!(err.to_string().contains("failed to stat"));
    }

    #[test]
    fn test_with_netns_path_runs_closure() {
        if unsafe { libc::geteuid() } != 0 {
            eprintln!("Skipping test: requires root privileges");
            return;
        }

        // Entering our own namespace is always permitted for root.
        let value = with_netns_path("/proc/self/ns/net", |host| {
            assert!(host.as_raw_fd() >= 0);
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_with_netns_path_propagates_error() {
        if unsafe { libc::geteuid() } != 0 {
            eprintln!("Skipping test: requires root privileges");
            return;
        }

        let err = with_netns_path("/proc/self/ns/net", |_| -> Result<()> {
            Err(NetError::Veth("boom".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, NetError::Veth(_)));
    }
}

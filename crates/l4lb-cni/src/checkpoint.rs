//! Registration of container namespaces for the load balancer.
//!
//! One file per attached container: the file name is the container ID, the
//! content is the namespace path with nothing else. The file existing is the
//! only record that a container is registered.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use l4lb_constants::checkpoint::{DIR_MODE, FILE_MODE};
use tracing::{debug, info, warn};

use crate::config::CheckpointConfig;
use crate::error::{CniError, Result};

/// A checkpoint directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Creates a store rooted at `dir`. Nothing is touched on disk.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store from the checkpoint settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings carry an empty path.
    pub fn from_config(config: &CheckpointConfig) -> Result<Self> {
        config.dir().map(Self::new)
    }

    /// The checkpoint directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `container_id`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the ID cannot be used as a file name.
    pub fn record_path(&self, container_id: &str) -> Result<PathBuf> {
        validate_container_id(container_id)?;
        Ok(self.dir.join(container_id))
    }

    /// Records `netns` for `container_id`, replacing any previous record.
    ///
    /// Only a directory that cannot be created is an error. A record that
    /// cannot be written is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the container ID is invalid or the directory
    /// cannot be created.
    pub fn register(&self, container_id: &str, netns: &Path) -> Result<()> {
        let path = self.record_path(container_id)?;

        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&self.dir)
            .map_err(|e| {
                CniError::Checkpoint(format!(
                    "failed to create checkpoint directory {}: {e}",
                    self.dir.display()
                ))
            })?;

        match write_record(&path, netns) {
            Ok(()) => info!(
                container_id,
                netns = %netns.display(),
                path = %path.display(),
                "container registered"
            ),
            Err(e) => warn!(
                container_id,
                path = %path.display(),
                error = %e,
                "failed to write checkpoint, container not registered"
            ),
        }
        Ok(())
    }

    /// Removes the record for `container_id`.
    ///
    /// Returns `false` if there was no record.
    ///
    /// # Errors
    ///
    /// Returns an error if the container ID is invalid or the file exists but
    /// cannot be removed.
    pub fn unregister(&self, container_id: &str) -> Result<bool> {
        let path = self.record_path(container_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(container_id, path = %path.display(), "container unregistered");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(container_id, path = %path.display(), "no checkpoint to remove");
                Ok(false)
            }
            Err(e) => Err(CniError::Checkpoint(format!(
                "failed to remove checkpoint {}: {e}",
                path.display()
            ))),
        }
    }

    /// The namespace recorded for `container_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the container ID is invalid or the file exists but
    /// cannot be read.
    pub fn lookup(&self, container_id: &str) -> Result<Option<PathBuf>> {
        let path = self.record_path(container_id)?;
        match fs::read_to_string(&path) {
            Ok(netns) => Ok(Some(PathBuf::from(netns))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CniError::Checkpoint(format!(
                "failed to read checkpoint {}: {e}",
                path.display()
            ))),
        }
    }
}

fn write_record(path: &Path, netns: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)?;
    file.write_all(netns.as_os_str().as_encoded_bytes())?;
    file.sync_all()
}

fn validate_container_id(container_id: &str) -> Result<()> {
    if container_id.is_empty()
        || container_id == "."
        || container_id == ".."
        || container_id.contains('/')
        || container_id.contains('\0')
    {
        return Err(CniError::Config(format!(
            "container ID {container_id:?} cannot be used as a checkpoint name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_register_writes_raw_netns() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/cni"));

        store
            .register("c0ffee", Path::new("/var/run/netns/c0ffee"))
            .unwrap();

        let path = store.dir().join("c0ffee");
        assert_eq!(fs::read(&path).unwrap(), b"/var/run/netns/c0ffee");
        let mode = fs::metadata(store.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            store.lookup("c0ffee").unwrap(),
            Some(PathBuf::from("/var/run/netns/c0ffee"))
        );
    }

    #[test]
    fn test_register_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store.register("c1", Path::new("/proc/1234/ns/net")).unwrap();
        store.register("c1", Path::new("/proc/99/ns/net")).unwrap();
        assert_eq!(fs::read(dir.path().join("c1")).unwrap(), b"/proc/99/ns/net");
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store.register("c1", Path::new("/proc/1/ns/net")).unwrap();
        assert!(store.unregister("c1").unwrap());
        assert!(!store.unregister("c1").unwrap());
        assert_eq!(store.lookup("c1").unwrap(), None);

        let missing = CheckpointStore::new(dir.path().join("never-created"));
        assert!(!missing.unregister("c1").unwrap());
    }

    #[test]
    fn test_directory_creation_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let store = CheckpointStore::new(blocker.join("cni"));
        let err = store.register("c1", Path::new("/proc/1/ns/net")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Checkpoint);
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the record should go makes the write fail.
        fs::create_dir(dir.path().join("c1")).unwrap();

        let store = CheckpointStore::new(dir.path());
        store.register("c1", Path::new("/proc/1/ns/net")).unwrap();
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        for id in ["", ".", "..", "../etc", "a/b"] {
            let err = store.register(id, Path::new("/proc/1/ns/net")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{id:?}");
        }
        assert!(store.unregister("..").is_err());
    }
}

//! Workspace layout and the advisory build lock.

use std::fs::{self, File, OpenOptions};

use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;
use tracing::info;

use crate::chroot::MountTable;
use crate::distro::DistroProfile;
use crate::error::KagamiError;

/// Name of the lock file created in the workspace root.
pub const LOCK_FILE: &str = ".kagami.lock";

/// Paths derived from one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: Utf8PathBuf,
    pub chroot_dir: Utf8PathBuf,
    pub image_dir: Utf8PathBuf,
}

impl Workspace {
    /// Derives the layout from `root`, made absolute against the current
    /// directory.
    pub fn new(root: &Utf8Path) -> Result<Self, KagamiError> {
        let absolute = std::path::absolute(root)
            .map_err(|e| KagamiError::io(format!("failed to resolve workspace {}", root), e))?;
        let root = Utf8PathBuf::from_path_buf(absolute).map_err(|p| {
            KagamiError::Validation(format!("workspace path is not UTF-8: {}", p.display()))
        })?;
        Ok(Self {
            chroot_dir: root.join("chroot"),
            image_dir: root.join("image"),
            root,
        })
    }

    /// Directory holding the squashfs, kernel and initrd.
    pub fn live_dir(&self, profile: &DistroProfile) -> Utf8PathBuf {
        self.image_dir.join(profile.live_dir)
    }

    /// Boot loader staging directory.
    pub fn isolinux_dir(&self) -> Utf8PathBuf {
        self.image_dir.join("isolinux")
    }

    pub fn install_dir(&self) -> Utf8PathBuf {
        self.image_dir.join("install")
    }

    /// Creates every workspace directory. Existing directories are kept.
    pub fn create(&self, profile: &DistroProfile) -> Result<(), KagamiError> {
        let dirs = [
            self.root.clone(),
            self.chroot_dir.clone(),
            self.image_dir.clone(),
            self.live_dir(profile),
            self.isolinux_dir(),
            self.install_dir(),
        ];
        for dir in &dirs {
            fs::create_dir_all(dir)
                .map_err(|e| KagamiError::io(format!("failed to create directory {}", dir), e))?;
        }
        Ok(())
    }

    /// Takes the exclusive build lock, creating the root if needed.
    ///
    /// Fails with [`KagamiError::Locked`] if another process holds it.
    pub fn lock(&self) -> Result<WorkspaceLock, KagamiError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| KagamiError::io(format!("failed to create directory {}", self.root), e))?;
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| KagamiError::io(format!("failed to open lock file {}", path), e))?;

        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => Ok(WorkspaceLock { _file: file, path }),
            Err(Errno::WOULDBLOCK) => Err(KagamiError::Locked(self.root.to_string())),
            Err(e) => Err(KagamiError::io(
                format!("failed to lock {}", path),
                std::io::Error::from(e),
            )),
        }
    }

    /// Deletes the workspace tree.
    ///
    /// Refuses while anything is still mounted below the chroot, so host
    /// `/dev` or `/run` can never be deleted through a bind mount.
    pub fn remove(&self, table: &MountTable) -> Result<(), KagamiError> {
        let remaining = table
            .mounted_under(&self.root)
            .map_err(|e| KagamiError::Mount(format!("{:#}", e)))?;
        if !remaining.is_empty() {
            let list: Vec<_> = remaining.iter().map(|p| p.as_str()).collect();
            return Err(KagamiError::Mount(format!(
                "refusing to remove {}: still mounted: {}",
                self.root,
                list.join(", ")
            )));
        }
        if !self.root.exists() {
            return Ok(());
        }
        info!("removing workspace directory {}", self.root);
        fs::remove_dir_all(&self.root)
            .map_err(|e| KagamiError::io(format!("failed to remove {}", self.root), e))
    }
}

/// Held for the duration of a build; the lock is released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    _file: File,
    path: Utf8PathBuf,
}

impl WorkspaceLock {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

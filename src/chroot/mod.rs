//! Command execution and file placement inside the bootstrapped root
//! filesystem.

mod mount;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::KagamiError;
use crate::executor::{CommandExecutor, CommandSpec};

pub use mount::{
    ChrootMounts, DEFAULT_UNMOUNT_RETRY_DELAY, MountPoint, MountTable, UNMOUNT_ATTEMPTS,
};

/// Environment every chroot script runs with.
const CHROOT_ENV: [(&str, &str); 3] = [
    ("HOME", "/root"),
    ("LC_ALL", "C"),
    ("DEBIAN_FRONTEND", "noninteractive"),
];

/// Rejects a `target` below `root` whose existing components include a symlink.
///
/// A symlink inside the chroot could otherwise redirect a mount or a file
/// write to an arbitrary host location.
pub(crate) fn validate_no_symlinks(root: &Utf8Path, target: &Utf8Path) -> Result<()> {
    let relative = target.strip_prefix("/").unwrap_or(target);
    let mut current = root.to_path_buf();

    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(KagamiError::Validation(format!(
                    "symlink detected at {} in chroot path {}; refusing to follow it",
                    current, target,
                ))
                .into());
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => {
                return Err(KagamiError::io(
                    format!("failed to check chroot path component {}", current),
                    e,
                )
                .into());
            }
        }
    }

    Ok(())
}

/// Runs shell commands inside the chroot through `chroot <root> /bin/bash -c`.
#[derive(Clone)]
pub struct ChrootSession {
    root: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl ChrootSession {
    pub fn new(root: &Utf8Path, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            root: root.to_owned(),
            executor,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Host path of a file inside the chroot.
    pub fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    /// Returns true if `relative` exists inside the chroot.
    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    fn script_spec(&self, script: &str) -> CommandSpec {
        CommandSpec::new(
            "chroot",
            vec![
                self.root.to_string(),
                "/bin/bash".to_string(),
                "-c".to_string(),
                script.to_string(),
            ],
        )
        .with_envs(CHROOT_ENV)
    }

    /// Runs `script`; output is streamed to the log.
    pub fn execute(&self, script: &str) -> Result<()> {
        debug!("chroot: {}", script);
        self.executor.execute_checked(&self.script_spec(script))?;
        Ok(())
    }

    /// Runs `script` and returns its standard output.
    pub fn execute_capturing(&self, script: &str) -> Result<String> {
        debug!("chroot (capturing): {}", script);
        let result = self
            .executor
            .execute_checked(&self.script_spec(script).capturing())?;
        Ok(result.stdout_lossy())
    }

    /// Writes `contents` to `relative` inside the chroot with the given mode,
    /// creating parent directories.
    ///
    /// A symlink at `relative` itself is replaced by a regular file, never
    /// followed.
    pub fn write_file(&self, relative: &str, contents: impl AsRef<[u8]>, mode: u32) -> Result<()> {
        let path = self.path(relative);
        if let Some(parent) = Utf8Path::new(relative.trim_start_matches('/')).parent() {
            validate_no_symlinks(&self.root, parent)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| KagamiError::io(format!("failed to create directory {}", parent), e))?;
        }
        if fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink()) {
            debug!("replacing symlink {}", path);
            fs::remove_file(&path)
                .map_err(|e| KagamiError::io(format!("failed to remove symlink {}", path), e))?;
        }
        fs::write(&path, contents)
            .map_err(|e| KagamiError::io(format!("failed to write {}", path), e))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .map_err(|e| KagamiError::io(format!("failed to set permissions on {}", path), e))?;
        Ok(())
    }
}

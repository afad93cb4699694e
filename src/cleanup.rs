//! Workspace teardown offered after a build.

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::chroot::ChrootMounts;
use crate::error::KagamiError;
use crate::executor::CommandExecutor;
use crate::pipeline::BuildEnvironment;
use crate::workspace::Workspace;

/// What to do with the workspace once a build has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupChoice {
    /// Unmount everything below the chroot and delete the workspace.
    Remove,
    /// Unmount everything below the chroot and keep the tree.
    UnmountOnly,
}

impl CleanupChoice {
    /// Removal after a failure, keeping the tree after a success.
    pub fn default_for(succeeded: bool) -> Self {
        if succeeded {
            Self::UnmountOnly
        } else {
            Self::Remove
        }
    }
}

/// Unmounts everything still mounted below the workspace's chroot.
///
/// Fails with [`KagamiError::Locked`] while a build holds the workspace.
pub fn teardown(
    workspace: &Workspace,
    env: &BuildEnvironment,
    executor: Arc<dyn CommandExecutor>,
) -> Result<(), KagamiError> {
    let _lock = workspace.lock()?;
    unmount_chroot(workspace, env, executor)
}

fn unmount_chroot(
    workspace: &Workspace,
    env: &BuildEnvironment,
    executor: Arc<dyn CommandExecutor>,
) -> Result<(), KagamiError> {
    let mut mounts = ChrootMounts::new(&workspace.chroot_dir, env.mount_table.clone(), executor)
        .with_retry_delay(env.unmount_retry_delay);
    mounts
        .unmount_all()
        .map_err(|e| KagamiError::Mount(format!("{:#}", e)))?;
    let remaining = mounts
        .remaining()
        .map_err(|e| KagamiError::Mount(format!("{:#}", e)))?;
    if !remaining.is_empty() {
        let list: Vec<_> = remaining.iter().map(|p| p.as_str()).collect();
        return Err(KagamiError::Mount(format!("still mounted: {}", list.join(", "))));
    }
    Ok(())
}

/// Moves `iso` out of the workspace when it was written inside it.
///
/// Returns the new location, or `None` if nothing had to move.
pub fn relocate_iso(
    iso: &Utf8Path,
    workspace: &Workspace,
) -> Result<Option<Utf8PathBuf>, KagamiError> {
    if !iso.starts_with(&workspace.root) || !iso.is_file() {
        return Ok(None);
    }
    let (Some(parent), Some(name)) = (workspace.root.parent(), iso.file_name()) else {
        return Ok(None);
    };
    let dest = parent.join(name);
    fs::rename(iso, &dest)
        .map_err(|e| KagamiError::io(format!("failed to move {} to {}", iso, dest), e))?;
    info!("moved {} to {}", iso, dest);
    Ok(Some(dest))
}

/// Unmounts and, for [`CleanupChoice::Remove`], deletes the workspace.
///
/// The workspace lock is held throughout, so a workspace that another build
/// is using is left untouched with [`KagamiError::Locked`]. An image inside
/// the workspace is moved next to it before deletion.
pub fn cleanup_workspace(
    workspace: &Workspace,
    env: &BuildEnvironment,
    executor: Arc<dyn CommandExecutor>,
    choice: CleanupChoice,
    iso: Option<&Utf8Path>,
) -> Result<(), KagamiError> {
    if !workspace.root.exists() {
        warn!("workspace {} does not exist", workspace.root);
        return Ok(());
    }
    let _lock = workspace.lock()?;
    unmount_chroot(workspace, env, executor)?;
    if choice == CleanupChoice::UnmountOnly {
        info!("workspace kept at {}", workspace.root);
        return Ok(());
    }
    if let Some(iso) = iso {
        relocate_iso(iso, workspace)?;
    }
    workspace.remove(&env.mount_table)?;
    info!("removed workspace {}", workspace.root);
    Ok(())
}

use anyhow::Result;

use crate::chroot::MountPoint;
use crate::error::KagamiError;
use crate::pipeline::BuildContext;

/// Phase 5: binds host `/dev` and `/run` into the chroot.
pub fn mount_filesystems(ctx: &mut BuildContext) -> Result<()> {
    ctx.mounts.mount(&MountPoint::HOST_BINDS)
}

/// Phase 15: removes every mount under the chroot, innermost first.
///
/// Fails if the mount table still lists anything below the chroot afterwards.
pub fn unmount_filesystems(ctx: &mut BuildContext) -> Result<()> {
    ctx.note("cleaning up mounts");
    ctx.mounts.unmount_all()?;
    let remaining = ctx.mounts.remaining()?;
    if !remaining.is_empty() {
        let list: Vec<_> = remaining.iter().map(|p| p.as_str()).collect();
        return Err(KagamiError::Mount(format!("still mounted: {}", list.join(", "))).into());
    }
    Ok(())
}

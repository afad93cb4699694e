use anyhow::Result;

use crate::chroot::MountPoint;
use crate::pipeline::BuildContext;

/// Phase 12: strips per-build state from the chroot and releases the kernel
/// filesystems mounted during configuration.
pub fn cleanup_chroot(ctx: &mut BuildContext) -> Result<()> {
    let chroot = ctx.chroot();
    chroot.execute("truncate -s 0 /etc/machine-id")?;
    chroot.execute("rm -f /sbin/initctl")?;
    chroot.execute("dpkg-divert --rename --remove /sbin/initctl")?;
    chroot.execute("apt-get clean")?;
    chroot.execute("rm -rf /tmp/* ~/.bash_history")?;

    let mut internal = MountPoint::INTERNAL;
    internal.reverse();
    ctx.mounts.unmount(&internal)
}

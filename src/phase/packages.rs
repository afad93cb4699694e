use anyhow::{Context, Result};
use tracing::info;

use super::{apt_install, headers_package};
use crate::pipeline::BuildContext;

/// Phase 8: upgrade, essential packages, kernel, then additional packages.
///
/// Everything up to the kernel is fatal; the additional packages and
/// `locale-gen` are best-effort.
pub fn install_packages(ctx: &mut BuildContext) -> Result<()> {
    let chroot = ctx.chroot();
    chroot.execute("apt-get -y dist-upgrade")?;

    let essentials = ctx.config.essential_packages();
    info!("installing {} essential packages", essentials.len());
    chroot
        .execute(&apt_install(&essentials, false))
        .context("failed to install essential packages")?;

    let kernel = ctx.config.kernel_package();
    let mut kernel_packages = vec![kernel.clone()];
    kernel_packages.extend(headers_package(&kernel));
    chroot
        .execute(&apt_install(&kernel_packages, true))
        .with_context(|| format!("failed to install kernel {}", kernel))?;

    let mut steps = ctx.best_effort();
    let locale = ctx.config.system.locale.clone();
    steps.attempt("locale-gen", || chroot.execute(&format!("locale-gen {}", locale)));
    for package in &ctx.config.packages.additional {
        steps.attempt(format!("install {}", package), || {
            chroot.execute(&apt_install(&[package], false))
        });
    }
    ctx.reports.push(steps.finish());
    Ok(())
}

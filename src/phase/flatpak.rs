use anyhow::{Context, Result};

use super::apt_install;
use crate::config::Desktop;
use crate::pipeline::BuildContext;

pub const FLATHUB_REPO: &str = "https://flathub.org/repo/flathub.flatpakrepo";

/// Flatpak plus the software-center plugin matching `desktop`.
pub fn flatpak_packages(desktop: Desktop) -> Vec<&'static str> {
    let mut packages = vec!["flatpak"];
    match desktop {
        Desktop::Gnome => packages.push("gnome-software-plugin-flatpak"),
        Desktop::Kde => packages.push("plasma-discover-backend-flatpak"),
        _ => {}
    }
    packages
}

/// Phase 10: installs Flatpak and registers Flathub when enabled.
pub fn configure_flatpak(ctx: &mut BuildContext) -> Result<()> {
    if !ctx.config.packages.enable_flatpak {
        return Ok(());
    }
    let chroot = ctx.chroot();
    chroot
        .execute(&apt_install(&flatpak_packages(ctx.config.packages.desktop), false))
        .context("failed to install flatpak")?;
    chroot.execute(&format!(
        "flatpak remote-add --if-not-exists flathub {}",
        FLATHUB_REPO
    ))?;
    ctx.note("flathub remote added");
    Ok(())
}

use anyhow::{Context, Result};
use tracing::info;

use super::installer::install_installer;
use super::{apt_install, apt_purge};
use crate::config::{Desktop, Distribution};
use crate::pipeline::BuildContext;

/// Ubuntu branding removed to leave a vanilla GNOME session.
const UBUNTU_GNOME_BRANDING: &[&str] = &[
    "ubuntu-session",
    "yaru-theme-gnome-shell",
    "yaru-theme-gtk",
    "yaru-theme-icon",
    "yaru-theme-sound",
];

/// Phase 9: desktop meta packages, the installer and package removals.
///
/// Only the desktop meta package install aborts the build.
pub fn install_desktop(ctx: &mut BuildContext) -> Result<()> {
    let chroot = ctx.chroot();
    let desktop = ctx.config.packages.desktop;
    let with_desktop = desktop != Desktop::None;

    if with_desktop {
        let packages = ctx.profile.desktop_packages(desktop);
        info!("installing {} desktop", desktop);
        chroot
            .execute(&apt_install(packages, ctx.profile.desktop_no_recommends))
            .with_context(|| format!("failed to install {} desktop", desktop))?;
    } else {
        ctx.note("no desktop selected, installing the installer only");
    }

    let mut steps = ctx.best_effort();
    install_installer(ctx, &chroot, &mut steps, with_desktop);

    let remove_list = &ctx.config.packages.remove_list;
    if !remove_list.is_empty() {
        steps.attempt("purge remove list", || chroot.execute(&apt_purge(remove_list)));
    }
    steps.attempt("autoremove", || chroot.execute("apt-get autoremove -y"));

    if desktop == Desktop::Gnome && ctx.config.distribution() == Distribution::Ubuntu {
        steps.attempt("purge ubuntu branding", || {
            chroot.execute(&apt_purge(UBUNTU_GNOME_BRANDING))
        });
        steps.attempt("gdm theme", || {
            chroot.execute(
                "update-alternatives --set gdm3-theme.desktop /usr/share/gnome-shell/theme/gnome-shell.css",
            )
        });
        steps.attempt("qt platform theme", || {
            chroot.execute(&apt_install(&["qgnomeplatform-qt5", "qgnomeplatform-qt6"], false))
        });
    }

    ctx.reports.push(steps.finish());
    Ok(())
}

//! Live-session installers: Ubiquity, Calamares and Subiquity.

use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{apt_install, apt_purge};
use crate::chroot::ChrootSession;
use crate::config::{Branding, InstallerKind, SLIDESHOWS};
use crate::pipeline::{BestEffort, BuildContext};

pub const UBIQUITY_PACKAGES: &[&str] = &[
    "ubiquity",
    "ubiquity-casper",
    "ubiquity-frontend-gtk",
    "ubiquity-ubuntu-artwork",
];

/// Slideshows pulled in by desktop meta packages and purged afterwards.
const FLAVOUR_SLIDESHOWS: &[&str] = &[
    "ubiquity-slideshow-kubuntu",
    "ubiquity-slideshow-xubuntu",
    "ubiquity-slideshow-lubuntu",
    "ubiquity-slideshow-ubuntu-mate",
    "ubiquity-slideshow-ubuntu-budgie",
    "ubiquity-slideshow-ubuntu",
];

/// `branding.desc` locations shipped by the various settings packages.
const BRANDING_FILES: &[&str] = &[
    "etc/calamares/branding/lubuntu/branding.desc",
    "etc/calamares/branding/debian/branding.desc",
    "etc/calamares/branding/default/branding.desc",
];

const MINIMAL_SESSION_PACKAGES: &[&str] = &[
    "xorg",
    "lightdm",
    "openbox",
    "tint2",
    "feh",
    "dunst",
    "lxpolkit",
    "network-manager-gnome",
];

const LIVE_USER: &str = "live";

const AUTOLOGIN: &str = "\
[Seat:*]
autologin-user=live
autologin-user-timeout=0
autologin-session=openbox
user-session=openbox
";

const AUTOSTART_ENTRY: &str = "\
[Desktop Entry]
Type=Application
Name=Install System
Comment=Launch Calamares Installer
Exec=sudo calamares
Icon=calamares
Terminal=false
Categories=System;
X-GNOME-Autostart-enabled=true
NoDisplay=false
";

const OPENBOX_AUTOSTART: &str = r##"tint2 &
feh --bg-fill /usr/share/backgrounds/default.png 2>/dev/null || xsetroot -solid "#2d2d2d" &
dunst &
lxpolkit &
nm-applet &
sleep 2
sudo calamares &
"##;

const POLKIT_RULE: &str = "\
[Allow Calamares]
Identity=unix-user:live
Action=*
ResultAny=yes
ResultInactive=yes
ResultActive=yes
";

const DESKTOP_LAUNCHER: &str = "\
[Desktop Entry]
Type=Application
Name=Install System
Comment=Launch the system installer
Exec=sudo calamares
Icon=calamares
Terminal=false
Categories=System;
";

const WELCOME: &str = "\
Welcome to the live system.

Double-click \"Install System\" on the desktop to launch the installer.
It also starts automatically a few seconds after login.

Live user: live
Password:  live
";

/// Installs the configured installer into the chroot.
///
/// With a desktop the installer goes in without recommends and the flavour
/// slideshows dragged in by the meta packages are purged again.
pub(crate) fn install_installer(
    ctx: &BuildContext,
    chroot: &ChrootSession,
    steps: &mut BestEffort,
    with_desktop: bool,
) {
    match ctx.config.installer.kind {
        InstallerKind::Ubiquity => install_ubiquity(ctx, chroot, steps, with_desktop),
        InstallerKind::Calamares => setup_calamares(ctx, chroot, steps, with_desktop),
        InstallerKind::Subiquity => {
            steps.attempt("install subiquity", || {
                chroot.execute(&apt_install(&["snapd"], false))?;
                chroot.execute(
                    "mkdir -p /var/lib/snapd/seed/snaps && \
                     snap download --target-directory=/var/lib/snapd/seed/snaps subiquity",
                )
            });
        }
    }
}

fn install_ubiquity(
    ctx: &BuildContext,
    chroot: &ChrootSession,
    steps: &mut BestEffort,
    with_desktop: bool,
) {
    let mut packages: Vec<String> = UBIQUITY_PACKAGES.iter().map(|p| p.to_string()).collect();
    if !with_desktop
        && let Some(ref slideshow) = ctx.config.installer.slideshow
        && SLIDESHOWS.contains(&slideshow.as_str())
    {
        packages.push(format!("ubiquity-slideshow-{}", slideshow));
    }
    steps.attempt("install ubiquity", || {
        chroot.execute(&apt_install(&packages, with_desktop))
    });
    if with_desktop {
        steps.attempt("purge flavour slideshows", || {
            chroot.execute(&apt_purge(FLAVOUR_SLIDESHOWS))
        });
    }
}

fn setup_calamares(
    ctx: &BuildContext,
    chroot: &ChrootSession,
    steps: &mut BestEffort,
    with_desktop: bool,
) {
    let installer = &ctx.config.installer;
    info!("setting up calamares");
    steps.attempt("install calamares", || {
        chroot.execute(&apt_install(
            &["calamares", ctx.profile.calamares_settings],
            false,
        ))
    });

    if installer.branding.product_name.as_deref().is_some_and(|n| !n.is_empty()) {
        steps.attempt("calamares branding", || apply_branding(chroot, &installer.branding));
    }

    if let Some(ref overlay) = installer.calamares_config {
        steps.attempt("calamares config", || {
            copy_tree(overlay, &chroot.path("etc/calamares"))
        });
    }

    if !with_desktop {
        minimal_installer(chroot, steps);
    }
}

/// Rewrites the branding keys present in `content`.
pub fn rewrite_branding(content: &str, branding: &Branding) -> Result<String> {
    let fields = [
        ("productName", &branding.product_name),
        ("shortProductName", &branding.short_product_name),
        ("productUrl", &branding.product_url),
        ("supportUrl", &branding.support_url),
    ];
    let mut out = content.to_string();
    for (key, value) in fields {
        let Some(value) = value.as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };
        let pattern = Regex::new(&format!(r"(?m)^[ \t]*{}:.*$", key))?;
        let line = format!("    {:<21}{}", format!("{}:", key), value);
        out = pattern.replace_all(&out, regex::NoExpand(&line)).into_owned();
    }
    if let Some(version) = branding.version.as_deref().filter(|v| !v.is_empty()) {
        let pattern = Regex::new(r"(?m)^[ \t]*version=.*$")?;
        let line = format!("version={}", version);
        out = pattern.replace_all(&out, regex::NoExpand(&line)).into_owned();
    }
    Ok(out)
}

fn apply_branding(chroot: &ChrootSession, branding: &Branding) -> Result<()> {
    let mut found = false;
    for relative in BRANDING_FILES {
        let path = chroot.path(relative);
        if !path.is_file() {
            continue;
        }
        found = true;
        let content =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path))?;
        let rewritten = rewrite_branding(&content, branding)?;
        chroot.write_file(relative, rewritten, 0o644)?;
        debug!("rewrote {}", path);
    }
    if !found {
        anyhow::bail!("no branding.desc found under /etc/calamares/branding");
    }
    Ok(())
}

/// Copies every file under `source` into `dest`, keeping the layout.
pub(crate) fn copy_tree(source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", source))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("{} escapes {}", entry.path().display(), source))?;
        let target = dest.as_std_path().join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Openbox session that logs in as `live` and launches Calamares.
fn minimal_installer(chroot: &ChrootSession, steps: &mut BestEffort) {
    steps.attempt("minimal session packages", || {
        chroot.execute(&apt_install(MINIMAL_SESSION_PACKAGES, false))
    });
    steps.attempt("live user", || {
        chroot.execute(&format!(
            "id {user} >/dev/null 2>&1 || useradd -m -G sudo -s /bin/bash {user}",
            user = LIVE_USER
        ))?;
        chroot.execute(&format!("echo '{user}:{user}' | chpasswd", user = LIVE_USER))?;
        chroot.write_file(
            "etc/sudoers.d/live",
            format!("{} ALL=(ALL) NOPASSWD: ALL\n", LIVE_USER),
            0o440,
        )
    });
    steps.attempt("autologin", || {
        chroot.write_file("etc/lightdm/lightdm.conf.d/50-autologin.conf", AUTOLOGIN, 0o644)
    });
    steps.attempt("installer autostart", || {
        chroot.write_file(
            "etc/xdg/autostart/calamares-installer.desktop",
            AUTOSTART_ENTRY,
            0o644,
        )?;
        chroot.write_file("etc/xdg/openbox/autostart", OPENBOX_AUTOSTART, 0o755)
    });
    steps.attempt("polkit rule", || {
        chroot.write_file(
            "etc/polkit-1/localauthority/50-local.d/allow-calamares.pkla",
            POLKIT_RULE,
            0o644,
        )
    });
    steps.attempt("desktop launcher", || {
        chroot.write_file("home/live/Desktop/install-system.desktop", DESKTOP_LAUNCHER, 0o755)?;
        chroot.write_file("home/live/Desktop/README.txt", WELCOME, 0o644)?;
        chroot.execute("chown -R live:live /home/live")
    });
    steps.attempt("enable lightdm", || chroot.execute("systemctl enable lightdm"));
}

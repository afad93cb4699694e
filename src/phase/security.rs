//! Snapd suppression and the optional hardening steps.
//!
//! Each layer is an independent best-effort step so that one failing write
//! never prevents the remaining layers from being applied.

use anyhow::Result;
use tracing::info;

use super::apt_purge;
use crate::chroot::ChrootSession;
use crate::pipeline::{BestEffort, BuildContext};

/// Packages that make up snapd and its helpers.
pub const SNAPD_PACKAGES: &[&str] = &[
    "snapd",
    "snap-confine",
    "ubuntu-core-launcher",
    "snapd-xdg-open",
];

const PINNED_PACKAGES: &[&str] = &[
    "snapd",
    "snapd:*",
    "snapd-unwrapped",
    "snap-confine",
    "ubuntu-core-launcher",
    "snapd-xdg-open",
];

pub const APT_PIN_PATH: &str = "etc/apt/preferences.d/nosnapd.pref";
pub const SERVICE_OVERRIDE_PATH: &str = "etc/systemd/system/snapd.service.d/override.conf";
pub const SOCKET_OVERRIDE_PATH: &str = "etc/systemd/system/snapd.socket.d/override.conf";
pub const MARKER_PATH: &str = "etc/snapd-blocked";
pub const APT_HOOK_CONF_PATH: &str = "etc/apt/apt.conf.d/99-block-snapd";
pub const APT_HOOK_PATH: &str = "usr/local/bin/block-snapd-hook";
pub const MOTD_PATH: &str = "etc/update-motd.d/99-snapd-blocked";
pub const PROFILE_PATH: &str = "etc/profile.d/block-snapd.sh";

/// Step names, in the order they are attempted.
pub const STEP_PURGE: &str = "purge snapd";
pub const STEP_AUTOREMOVE: &str = "autoremove";
pub const STEP_STATE: &str = "remove snapd state";
pub const STEP_APT_PIN: &str = "apt pin";
pub const STEP_SERVICE_OVERRIDE: &str = "systemd service override";
pub const STEP_MARKER: &str = "marker file";
pub const STEP_SOCKET_OVERRIDE: &str = "systemd socket override";
pub const STEP_APT_HOOK: &str = "apt pre-install hook";
pub const STEP_MOTD: &str = "motd notice";
pub const STEP_DIVERT: &str = "divert snap binary";
pub const STEP_LEFTOVERS: &str = "remove snap directories";
pub const STEP_PROFILE: &str = "shell guard";

/// Renders the APT preferences file pinning every snapd package below zero.
pub fn apt_pin() -> String {
    let mut out = String::from(
        "# Snapd is permanently blocked on this system\n\
         Explanation: Snapd is permanently blocked on this system to prevent unwanted installation.\n",
    );
    let stanzas: Vec<String> = PINNED_PACKAGES
        .iter()
        .map(|pkg| format!("Package: {}\nPin: release *\nPin-Priority: -1\n", pkg))
        .collect();
    out.push_str(&stanzas.join("\n"));
    out
}

pub const SERVICE_OVERRIDE: &str = "\
[Unit]
# Snapd is permanently disabled on this system
ConditionPathExists=!/etc/snapd-blocked

[Service]
ExecStart=
ExecStart=/bin/false
";

pub const SOCKET_OVERRIDE: &str = "\
[Unit]
ConditionPathExists=!/etc/snapd-blocked

[Socket]
ListenStream=
";

const MARKER: &str = "Snapd is permanently blocked on this system\n";

pub const APT_HOOK_CONF: &str = "\
// Block snapd package installation
DPkg::Pre-Install-Pkgs {
  \"/usr/local/bin/block-snapd-hook\";
};
";

pub const APT_HOOK: &str = r#"#!/bin/bash
while read pkg; do
    if [[ "$pkg" == *"snapd"* ]]; then
        echo "==========================================" >&2
        echo "ERROR: Installation of snapd is BLOCKED on this system!" >&2
        echo "This distribution is configured to never use snapd." >&2
        echo "==========================================" >&2
        exit 1
    fi
done
exit 0
"#;

const MOTD: &str = r#"#!/bin/sh
echo ""
echo "-----------------------------------------------------------"
echo "  WARNING: Snapd is permanently blocked on this system     "
echo "  Snap packages cannot be installed or used                "
echo "-----------------------------------------------------------"
echo ""
"#;

pub const PROFILE_GUARD: &str = r#"export SNAPD_BLOCKED=1
snap() {
    echo "ERROR: Snapd is permanently blocked on this system" >&2
    return 1
}
"#;

/// Phase 7: snapd suppression layers, firewall and service masking.
pub fn apply_security(ctx: &mut BuildContext) -> Result<()> {
    let chroot = ctx.chroot();
    let mut steps = ctx.best_effort();

    if ctx.config.suppress_snapd() {
        info!("blocking snapd permanently");
        suppress_snapd(&chroot, &mut steps);
    }

    if ctx.config.security.enable_firewall {
        steps.attempt("firewall", || {
            chroot.execute("apt-get install -y ufw")?;
            chroot.execute("ufw --force enable")
        });
    }

    for service in &ctx.config.security.disable_services {
        steps.attempt(format!("disable {}", service), || {
            chroot.execute(&format!("systemctl disable {}", service))
        });
    }

    ctx.reports.push(steps.finish());
    Ok(())
}

/// Attempts every suppression layer, in order.
fn suppress_snapd(chroot: &ChrootSession, steps: &mut BestEffort) {
    steps.attempt(STEP_PURGE, || chroot.execute(&apt_purge(SNAPD_PACKAGES)));
    steps.attempt(STEP_AUTOREMOVE, || chroot.execute("apt-get autoremove -y"));
    steps.attempt(STEP_STATE, || {
        chroot.execute("rm -rf /var/cache/snapd /var/lib/snapd /var/snap /snap")
    });
    steps.attempt(STEP_APT_PIN, || chroot.write_file(APT_PIN_PATH, apt_pin(), 0o644));
    steps.attempt(STEP_SERVICE_OVERRIDE, || {
        chroot.write_file(SERVICE_OVERRIDE_PATH, SERVICE_OVERRIDE, 0o644)
    });
    steps.attempt(STEP_MARKER, || chroot.write_file(MARKER_PATH, MARKER, 0o644));
    steps.attempt(STEP_SOCKET_OVERRIDE, || {
        chroot.write_file(SOCKET_OVERRIDE_PATH, SOCKET_OVERRIDE, 0o644)
    });
    steps.attempt(STEP_APT_HOOK, || {
        chroot.write_file(APT_HOOK_CONF_PATH, APT_HOOK_CONF, 0o644)?;
        chroot.write_file(APT_HOOK_PATH, APT_HOOK, 0o755)
    });
    steps.attempt(STEP_MOTD, || chroot.write_file(MOTD_PATH, MOTD, 0o755));
    steps.attempt(STEP_DIVERT, || {
        chroot.execute("dpkg-divert --local --rename --add /usr/bin/snap")?;
        chroot.execute("ln -sf /bin/false /usr/bin/snap")
    });
    steps.attempt(STEP_LEFTOVERS, || {
        chroot.execute("rm -rf /snap /var/snap /var/lib/snapd ~/snap")
    });
    steps.attempt(STEP_PROFILE, || chroot.write_file(PROFILE_PATH, PROFILE_GUARD, 0o755));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_covers_every_snapd_package() {
        let pin = apt_pin();
        assert!(pin.starts_with("# Snapd is permanently blocked on this system\n"));
        for pkg in PINNED_PACKAGES {
            assert!(pin.contains(&format!("Package: {}\nPin: release *\nPin-Priority: -1\n", pkg)));
        }
        assert_eq!(pin.matches("Pin-Priority: -1").count(), PINNED_PACKAGES.len());
        assert!(pin.contains("Pin-Priority: -1\n\nPackage: snapd:*\n"));
    }

    #[test]
    fn overrides_are_gated_on_marker() {
        assert!(SERVICE_OVERRIDE.contains("ConditionPathExists=!/etc/snapd-blocked"));
        assert!(SERVICE_OVERRIDE.ends_with("ExecStart=\nExecStart=/bin/false\n"));
        assert!(SOCKET_OVERRIDE.ends_with("[Socket]\nListenStream=\n"));
    }

    #[test]
    fn hook_rejects_snapd() {
        assert!(APT_HOOK.starts_with("#!/bin/bash\n"));
        assert!(APT_HOOK.contains(r#"if [[ "$pkg" == *"snapd"* ]]; then"#));
        assert!(APT_HOOK_CONF.contains("\"/usr/local/bin/block-snapd-hook\";"));
    }
}

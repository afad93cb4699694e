//! Distribution capability table.
//!
//! Everything that differs between Ubuntu and Debian builds (live directory,
//! boot parameter, mirrors, package tables, repository layout) is looked up
//! here once per build through [`DistroProfile`], instead of branching on the
//! distribution inside every phase.

use crate::config::{Architecture, Desktop, Distribution};

/// Ubuntu codenames accepted by validation.
pub const UBUNTU_RELEASES: &[&str] = &["focal", "jammy", "noble", "resolute"];
/// Ubuntu aliases resolved by the release resolution phase.
pub const UBUNTU_ALIASES: &[&str] = &["lts", "rolling", "devel"];
/// Debian codenames accepted by validation.
pub const DEBIAN_RELEASES: &[&str] = &["bookworm", "trixie", "sid"];
/// Debian suite aliases resolved by the release resolution phase.
pub const DEBIAN_ALIASES: &[&str] = &["stable", "testing", "unstable"];

/// Ubuntu LTS codenames, used for the human-readable distribution name.
const UBUNTU_LTS: &[&str] = &["focal", "jammy", "noble", "resolute"];

/// Codename that debootstrap uses when the target is the Ubuntu development series.
pub const UBUNTU_DEVEL_BOOTSTRAP: &str = "noble";

impl Distribution {
    /// Returns the distribution that owns a codename or alias, if any.
    pub fn for_release(release: &str) -> Option<Self> {
        [Self::Ubuntu, Self::Debian]
            .into_iter()
            .find(|distro| distro.accepts_release(release))
    }

    /// Infers the distribution from a mirror URL.
    pub fn for_mirror(mirror: &str) -> Option<Self> {
        let lower = mirror.to_ascii_lowercase();
        if lower.contains("debian") {
            Some(Self::Debian)
        } else if lower.contains("ubuntu") {
            Some(Self::Ubuntu)
        } else {
            None
        }
    }

    /// Returns true if `release` is a codename or alias of this distribution.
    pub fn accepts_release(self, release: &str) -> bool {
        let (codenames, aliases) = self.release_tables();
        codenames.contains(&release) || aliases.contains(&release)
    }

    /// Returns true if `release` is an alias needing resolution.
    pub fn is_alias(self, release: &str) -> bool {
        self.release_tables().1.contains(&release)
    }

    fn release_tables(self) -> (&'static [&'static str], &'static [&'static str]) {
        match self {
            Self::Ubuntu => (UBUNTU_RELEASES, UBUNTU_ALIASES),
            Self::Debian => (DEBIAN_RELEASES, DEBIAN_ALIASES),
        }
    }

    /// Returns the capability profile for this distribution.
    pub fn profile(self) -> &'static DistroProfile {
        match self {
            Self::Ubuntu => &UBUNTU,
            Self::Debian => &DEBIAN,
        }
    }
}

/// Outcome of release alias resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Release string as configured (codename or alias).
    pub requested: String,
    /// Concrete codename, or the alias literal when resolution failed.
    pub codename: String,
    /// Alias that was resolved, if the requested release was an alias.
    pub alias: Option<String>,
    /// Human readable name from the archive metadata (e.g. "Debian 12").
    pub pretty_name: Option<String>,
}

impl ReleaseInfo {
    /// A release that needs no resolution.
    pub fn literal(release: &str) -> Self {
        Self {
            requested: release.to_string(),
            codename: release.to_string(),
            alias: None,
            pretty_name: None,
        }
    }

    /// Returns true if the target is Debian unstable (no updates/security suites).
    pub fn is_unstable(&self) -> bool {
        self.codename == "sid" || self.alias.as_deref() == Some("unstable")
    }
}

/// Static per-distribution build facts.
#[derive(Debug)]
pub struct DistroProfile {
    pub distribution: Distribution,
    /// Directory under the image root holding the squashfs, kernel and initrd.
    pub live_dir: &'static str,
    /// Value of the kernel `boot=` parameter understood by the live initramfs.
    pub boot_token: &'static str,
    pub default_mirror: &'static str,
    /// Archive components written to every `sources.list` line.
    pub components: &'static str,
    /// Whether desktop meta packages are installed without recommends.
    pub desktop_no_recommends: bool,
    /// Distribution-specific Calamares settings package.
    pub calamares_settings: &'static str,
    essentials: &'static [&'static str],
    additional: &'static [&'static str],
    remove_list: &'static [&'static str],
    desktops: &'static [(Desktop, &'static [&'static str])],
}

static UBUNTU: DistroProfile = DistroProfile {
    distribution: Distribution::Ubuntu,
    live_dir: "casper",
    boot_token: "casper",
    default_mirror: "http://archive.ubuntu.com/ubuntu/",
    components: "main restricted universe multiverse",
    desktop_no_recommends: false,
    calamares_settings: "calamares-settings-ubuntu",
    essentials: &[
        "sudo",
        "ubuntu-standard",
        "casper",
        "discover",
        "laptop-detect",
        "os-prober",
        "network-manager",
        "net-tools",
        "wireless-tools",
        "wpagui",
        "locales",
        "grub-common",
        "grub-gfxpayload-lists",
        "grub2-common",
        "mtools",
        "binutils",
    ],
    additional: &["vim", "nano", "curl", "wget", "git", "htop"],
    remove_list: &[
        "ubuntu-advantage-tools",
        "ubuntu-report",
        "whoopsie",
        "apport",
        "popularity-contest",
    ],
    desktops: &[
        (
            Desktop::Gnome,
            &[
                "vanilla-gnome-desktop",
                "vanilla-gnome-default-settings",
                "gnome-session",
                "gnome-tweaks",
                "gnome-shell-extension-manager",
                "gnome-backgrounds",
                "fonts-cantarell",
                "adwaita-icon-theme",
                "plymouth-themes",
            ],
        ),
        (Desktop::Kde, &["kde-plasma-desktop"]),
        (Desktop::Xfce, &["xfce4", "xfce4-goodies"]),
        (Desktop::Lxde, &["lxde"]),
        (Desktop::Lxqt, &["lxqt"]),
        (Desktop::Mate, &["mate-desktop-environment"]),
    ],
};

static DEBIAN: DistroProfile = DistroProfile {
    distribution: Distribution::Debian,
    live_dir: "live",
    boot_token: "live",
    default_mirror: "http://deb.debian.org/debian/",
    components: "main contrib non-free non-free-firmware",
    desktop_no_recommends: true,
    calamares_settings: "calamares-settings-debian",
    essentials: &[
        "sudo",
        "live-boot",
        "live-boot-initramfs-tools",
        "live-config",
        "live-config-systemd",
        "discover",
        "laptop-detect",
        "os-prober",
        "network-manager",
        "net-tools",
        "wireless-tools",
        "locales",
        "grub-common",
        "grub2-common",
        "mtools",
        "binutils",
    ],
    additional: &["vim", "nano", "curl", "wget", "git", "htop"],
    remove_list: &["popularity-contest"],
    desktops: &[
        (Desktop::Gnome, &["task-gnome-desktop"]),
        (Desktop::Kde, &["task-kde-desktop"]),
        (Desktop::Xfce, &["task-xfce-desktop"]),
        (Desktop::Lxde, &["task-lxde-desktop"]),
        (Desktop::Lxqt, &["task-lxqt-desktop"]),
        (Desktop::Mate, &["task-mate-desktop"]),
    ],
};

impl DistroProfile {
    /// Kernel command line parameter selecting the live initramfs hook.
    pub fn boot_parameter(&self) -> String {
        format!("boot={}", self.boot_token)
    }

    /// Essential packages for a bootable live system on `arch`.
    pub fn default_essentials(&self, arch: Architecture) -> Vec<String> {
        let mut packages: Vec<String> = self.essentials.iter().map(|p| p.to_string()).collect();
        let bootloader: &[&str] = match (self.distribution, arch) {
            (Distribution::Ubuntu, Architecture::Amd64) => {
                &["grub-pc", "grub-pc-bin", "grub-efi-amd64-signed", "shim-signed"]
            }
            (Distribution::Debian, Architecture::Amd64) => {
                &["grub-pc-bin", "grub-efi-amd64-signed", "shim-signed"]
            }
            (_, Architecture::I386) => &["grub-pc", "grub-pc-bin", "grub-efi-ia32-bin"],
            (_, Architecture::Arm64) => &["grub-efi-arm64-signed", "shim-signed"],
        };
        packages.extend(bootloader.iter().map(|p| p.to_string()));
        packages
    }

    pub fn default_additional(&self) -> Vec<String> {
        self.additional.iter().map(|p| p.to_string()).collect()
    }

    pub fn default_remove_list(&self) -> Vec<String> {
        self.remove_list.iter().map(|p| p.to_string()).collect()
    }

    /// Kernel meta package installed when the configuration names none.
    pub fn default_kernel(&self, arch: Architecture) -> &'static str {
        match (self.distribution, arch) {
            (Distribution::Ubuntu, _) => "linux-generic",
            (Distribution::Debian, Architecture::Amd64) => "linux-image-amd64",
            (Distribution::Debian, Architecture::Arm64) => "linux-image-arm64",
            (Distribution::Debian, Architecture::I386) => "linux-image-686",
        }
    }

    /// Filename suffix used to find the installed kernel under `/boot`.
    pub fn kernel_suffix(&self, kernel: Option<&str>, arch: Architecture) -> &'static str {
        if let Some(kernel) = kernel {
            for flavour in ["lowlatency", "oem", "amd64", "arm64", "rt"] {
                if kernel.contains(flavour) {
                    return flavour;
                }
            }
        }
        match (self.distribution, arch) {
            (Distribution::Ubuntu, _) => "generic",
            (Distribution::Debian, Architecture::Amd64) => "amd64",
            (Distribution::Debian, Architecture::Arm64) => "arm64",
            (Distribution::Debian, Architecture::I386) => "686",
        }
    }

    /// Desktop meta packages; empty for `Desktop::None`.
    pub fn desktop_packages(&self, desktop: Desktop) -> &'static [&'static str] {
        self.desktops
            .iter()
            .find(|(d, _)| *d == desktop)
            .map(|(_, pkgs)| *pkgs)
            .unwrap_or(&[])
    }

    /// Renders `/etc/apt/sources.list` for the target release.
    pub fn sources_list(&self, mirror: &str, release: &ReleaseInfo, use_proposed: bool) -> String {
        let codename = release.codename.as_str();
        let components = self.components;
        let pair = |uri: &str, suite: &str| {
            format!(
                "deb {uri} {suite} {components}\ndeb-src {uri} {suite} {components}\n",
                uri = uri,
                suite = suite,
                components = components
            )
        };

        let mut out = String::new();
        match self.distribution {
            Distribution::Debian if release.is_unstable() => {
                out.push_str(&pair(mirror, codename));
            }
            Distribution::Debian => {
                out.push_str(&pair(mirror, codename));
                out.push('\n');
                out.push_str(&pair(mirror, &format!("{}-updates", codename)));
                out.push('\n');
                out.push_str(&pair(
                    "http://security.debian.org/debian-security",
                    &format!("{}-security", codename),
                ));
            }
            Distribution::Ubuntu => {
                out.push_str(&pair(mirror, codename));
                out.push('\n');
                out.push_str(&pair(mirror, &format!("{}-security", codename)));
                out.push('\n');
                out.push_str(&pair(mirror, &format!("{}-updates", codename)));
                if use_proposed {
                    out.push('\n');
                    out.push_str(&pair(mirror, &format!("{}-proposed", codename)));
                }
            }
        }
        out
    }

    /// Human readable distribution name used in boot menus and disk defines.
    pub fn dist_name(&self, release: &ReleaseInfo) -> String {
        if let Some(ref pretty) = release.pretty_name {
            return pretty.clone();
        }
        match self.distribution {
            Distribution::Debian => match release.alias {
                Some(ref alias) => format!("Debian {}", capitalize(alias)),
                None => format!("Debian ({})", release.codename),
            },
            Distribution::Ubuntu => {
                let alias = release.alias.as_deref();
                if UBUNTU_LTS.contains(&release.codename.as_str()) || alias == Some("lts") {
                    "Ubuntu LTS".to_string()
                } else if matches!(alias, Some("devel" | "rolling")) {
                    "Ubuntu Rolling".to_string()
                } else {
                    "Ubuntu Custom".to_string()
                }
            }
        }
    }
}

/// Upper-cases the first character of `word`.
pub(crate) fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(codename: &str, alias: Option<&str>) -> ReleaseInfo {
        ReleaseInfo {
            requested: alias.unwrap_or(codename).to_string(),
            codename: codename.to_string(),
            alias: alias.map(str::to_string),
            pretty_name: None,
        }
    }

    #[test]
    fn release_ownership() {
        assert_eq!(Distribution::for_release("jammy"), Some(Distribution::Ubuntu));
        assert_eq!(Distribution::for_release("lts"), Some(Distribution::Ubuntu));
        assert_eq!(Distribution::for_release("trixie"), Some(Distribution::Debian));
        assert_eq!(Distribution::for_release("stable"), Some(Distribution::Debian));
        assert_eq!(Distribution::for_release("buster"), None);
        assert_eq!(Distribution::for_release("devel"), Some(Distribution::Ubuntu));
        assert!(Distribution::Ubuntu.is_alias("devel"));
        assert!(Distribution::Debian.is_alias("testing"));
        assert!(!Distribution::Debian.is_alias("trixie"));
    }

    #[test]
    fn mirror_inference() {
        assert_eq!(
            Distribution::for_mirror("http://deb.debian.org/debian/"),
            Some(Distribution::Debian)
        );
        assert_eq!(
            Distribution::for_mirror("http://de.archive.ubuntu.com/ubuntu/"),
            Some(Distribution::Ubuntu)
        );
        assert_eq!(Distribution::for_mirror("http://mirror.example.com/"), None);
    }

    #[test]
    fn live_layout_differs_per_distribution() {
        assert_eq!(Distribution::Ubuntu.profile().live_dir, "casper");
        assert_eq!(Distribution::Ubuntu.profile().boot_parameter(), "boot=casper");
        assert_eq!(Distribution::Debian.profile().live_dir, "live");
        assert_eq!(Distribution::Debian.profile().boot_parameter(), "boot=live");
    }

    #[test]
    fn ubuntu_sources_include_pockets() {
        let profile = Distribution::Ubuntu.profile();
        let text = profile.sources_list(
            "http://archive.ubuntu.com/ubuntu/",
            &resolved("jammy", None),
            false,
        );
        assert!(text.contains(
            "deb http://archive.ubuntu.com/ubuntu/ jammy main restricted universe multiverse"
        ));
        assert!(text.contains("jammy-security"));
        assert!(text.contains("jammy-updates"));
        assert!(!text.contains("proposed"));

        let proposed = profile.sources_list("http://m/", &resolved("jammy", None), true);
        assert!(proposed.contains("deb http://m/ jammy-proposed"));
    }

    #[test]
    fn debian_sources_use_security_archive() {
        let profile = Distribution::Debian.profile();
        let text = profile.sources_list(
            "http://deb.debian.org/debian/",
            &resolved("bookworm", Some("stable")),
            true,
        );
        assert!(text.contains(
            "deb http://security.debian.org/debian-security bookworm-security main contrib non-free non-free-firmware"
        ));
        assert!(text.contains("bookworm-updates"));
        assert!(!text.contains("proposed"));
    }

    #[test]
    fn debian_unstable_has_single_suite() {
        let profile = Distribution::Debian.profile();
        let text = profile.sources_list("http://m/", &resolved("sid", None), false);
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("security"));
    }

    #[test]
    fn kernel_defaults_and_suffixes() {
        let ubuntu = Distribution::Ubuntu.profile();
        let debian = Distribution::Debian.profile();
        assert_eq!(ubuntu.default_kernel(Architecture::Amd64), "linux-generic");
        assert_eq!(debian.default_kernel(Architecture::Arm64), "linux-image-arm64");
        assert_eq!(ubuntu.kernel_suffix(None, Architecture::Amd64), "generic");
        assert_eq!(ubuntu.kernel_suffix(Some("linux-lowlatency"), Architecture::Amd64), "lowlatency");
        assert_eq!(ubuntu.kernel_suffix(Some("linux-oem-22.04"), Architecture::Amd64), "oem");
        assert_eq!(debian.kernel_suffix(Some("linux-image-rt-amd64"), Architecture::Amd64), "amd64");
        assert_eq!(debian.kernel_suffix(None, Architecture::Amd64), "amd64");
    }

    #[test]
    fn desktop_tables() {
        let ubuntu = Distribution::Ubuntu.profile();
        assert!(ubuntu.desktop_packages(Desktop::Gnome).contains(&"vanilla-gnome-desktop"));
        assert_eq!(ubuntu.desktop_packages(Desktop::Xfce), &["xfce4", "xfce4-goodies"]);
        assert!(ubuntu.desktop_packages(Desktop::None).is_empty());
        let debian = Distribution::Debian.profile();
        assert_eq!(debian.desktop_packages(Desktop::Kde), &["task-kde-desktop"]);
        assert!(debian.desktop_no_recommends);
    }

    #[test]
    fn essentials_follow_architecture() {
        let ubuntu = Distribution::Ubuntu.profile();
        let amd64 = ubuntu.default_essentials(Architecture::Amd64);
        assert!(amd64.iter().any(|p| p == "casper"));
        assert!(amd64.iter().any(|p| p == "grub-efi-amd64-signed"));
        let arm64 = ubuntu.default_essentials(Architecture::Arm64);
        assert!(arm64.iter().any(|p| p == "grub-efi-arm64-signed"));
        assert!(!arm64.iter().any(|p| p == "grub-pc-bin"));
        let debian = Distribution::Debian.profile().default_essentials(Architecture::Amd64);
        assert!(debian.iter().any(|p| p == "live-boot"));
        assert!(!debian.iter().any(|p| p == "casper"));
    }

    #[test]
    fn dist_names() {
        let ubuntu = Distribution::Ubuntu.profile();
        assert_eq!(ubuntu.dist_name(&resolved("noble", None)), "Ubuntu LTS");
        assert_eq!(ubuntu.dist_name(&resolved("questing", Some("devel"))), "Ubuntu Rolling");
        let debian = Distribution::Debian.profile();
        assert_eq!(debian.dist_name(&resolved("trixie", Some("testing"))), "Debian Testing");
        assert_eq!(debian.dist_name(&resolved("bookworm", None)), "Debian (bookworm)");
        let mut pretty = resolved("bookworm", Some("stable"));
        pretty.pretty_name = Some("Debian 12.5".to_string());
        assert_eq!(debian.dist_name(&pretty), "Debian 12.5");
    }
}

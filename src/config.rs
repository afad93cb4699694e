//! Build configuration record.
//!
//! A [`BuildConfig`] is loaded from a YAML (or JSON) file, optionally adjusted
//! by CLI overrides, and then validated once. After validation it is treated
//! as read-only by every pipeline phase.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::distro::DistroProfile;
use crate::error::KagamiError;

/// Target distribution family.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Distribution {
    #[default]
    Ubuntu,
    Debian,
}

/// Target CPU architecture.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    #[default]
    Amd64,
    Arm64,
    I386,
}

impl Architecture {
    /// Suffix used by EFI loader file names (`bootx64.efi`, `grubaa64.efi`, ...).
    pub fn efi_suffix(self) -> &'static str {
        match self {
            Self::Amd64 => "x64",
            Self::Arm64 => "aa64",
            Self::I386 => "ia32",
        }
    }

    /// GRUB platform directory name for the EFI target.
    pub fn grub_efi_platform(self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64-efi",
            Self::Arm64 => "arm64-efi",
            Self::I386 => "i386-efi",
        }
    }

    /// Whether the image carries a BIOS El Torito boot record.
    pub fn has_bios_boot(self) -> bool {
        matches!(self, Self::Amd64 | Self::I386)
    }
}

/// Desktop environment installed into the live system.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Desktop {
    Gnome,
    Kde,
    Xfce,
    Lxde,
    Lxqt,
    Mate,
    #[default]
    None,
}

/// Installer shipped in the live session.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstallerKind {
    #[default]
    Ubiquity,
    Calamares,
    Subiquity,
}

/// Slideshow themes that map to `ubiquity-slideshow-*` packages.
pub const SLIDESHOWS: &[&str] = &["ubuntu", "kubuntu", "xubuntu", "lubuntu", "ubuntu-mate"];

/// Complete description of one image build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Distribution family; inferred from the release or mirror when absent.
    #[serde(default)]
    pub distro: Option<Distribution>,
    /// Codename (e.g. "noble") or alias (e.g. "stable").
    pub release: String,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub packages: PackageConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub hostname: String,
    pub architecture: Architecture,
    pub locale: String,
    pub timezone: String,
    /// Apply the snapd suppression layer (Ubuntu only).
    pub block_snapd: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            hostname: "ubuntu-kagami".to_string(),
            architecture: Architecture::default(),
            locale: "en_US.UTF-8".to_string(),
            timezone: "UTC".to_string(),
            block_snapd: true,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Package mirror; the distribution default is used when absent.
    pub mirror: Option<String>,
    /// Enable the Ubuntu `-proposed` pocket.
    pub use_proposed: bool,
    pub additional_repos: Vec<AdditionalRepo>,
}

/// An extra APT repository written to `sources.list.d`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditionalRepo {
    pub name: String,
    pub uri: String,
    pub suite: String,
    #[serde(default)]
    pub components: Vec<String>,
    /// URL of a signing key, an inline armored key, or nothing.
    #[serde(default)]
    pub key: Option<String>,
}

impl AdditionalRepo {
    /// Classifies the configured signing key.
    pub fn signing_key(&self) -> Result<SigningKey, KagamiError> {
        SigningKey::parse(self.key.as_deref())
    }
}

/// Where a repository signing key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningKey {
    /// Downloaded from a URL; binary if the path ends with `.gpg`.
    Url(Url),
    /// ASCII-armored key text embedded in the configuration.
    Inline(String),
    /// The repository is added without `signed-by`.
    None,
}

impl SigningKey {
    pub fn parse(raw: Option<&str>) -> Result<Self, KagamiError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::None);
        };
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| KagamiError::Validation(format!("invalid key URL {}: {}", raw, e)))?;
            return Ok(Self::Url(url));
        }
        Ok(Self::Inline(raw.to_string()))
    }

    /// Returns true if the key is fetched as a binary keyring.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Url(url) if url.path().ends_with(".gpg"))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Mandatory packages; the distribution defaults are used when empty.
    pub essential: Vec<String>,
    /// Best-effort user packages.
    pub additional: Vec<String>,
    pub desktop: Desktop,
    /// Kernel package; the distribution default is used when absent.
    pub kernel: Option<String>,
    /// Packages purged after the desktop and installer are in place.
    pub remove_list: Vec<String>,
    pub enable_flatpak: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    #[serde(rename = "type")]
    pub kind: InstallerKind,
    pub slideshow: Option<String>,
    /// Directory copied verbatim into `/etc/calamares`.
    pub calamares_config: Option<Utf8PathBuf>,
    pub branding: Branding,
}

/// Calamares `branding.desc` overrides.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Branding {
    pub product_name: Option<String>,
    pub short_product_name: Option<String>,
    pub product_url: Option<String>,
    pub support_url: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_firewall: bool,
    pub disable_services: Vec<String>,
    pub block_snapd_forever: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_firewall: false,
            disable_services: Vec::new(),
            block_snapd_forever: true,
        }
    }
}

/// Values supplied on the command line that take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub release: Option<String>,
    pub hostname: Option<String>,
    pub mirror: Option<String>,
}

impl BuildConfig {
    /// Built-in configuration for a release, used when no file is given.
    pub fn default_for(release: &str) -> Self {
        let distro = Distribution::for_release(release).unwrap_or_default();
        let profile = distro.profile();
        let system = SystemConfig {
            hostname: format!("{}-kagami", distro),
            ..SystemConfig::default()
        };
        Self {
            distro: Some(distro),
            release: release.to_string(),
            packages: PackageConfig {
                essential: profile.default_essentials(system.architecture),
                additional: profile.default_additional(),
                remove_list: profile.default_remove_list(),
                ..PackageConfig::default()
            },
            installer: InstallerConfig {
                kind: match distro {
                    Distribution::Ubuntu => InstallerKind::Ubiquity,
                    Distribution::Debian => InstallerKind::Calamares,
                },
                slideshow: (distro == Distribution::Ubuntu).then(|| "ubuntu".to_string()),
                ..InstallerConfig::default()
            },
            system,
            repository: RepositoryConfig::default(),
            security: SecurityConfig::default(),
        }
    }

    /// Applies command line overrides.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref release) = overrides.release {
            self.release = release.clone();
        }
        if let Some(ref hostname) = overrides.hostname {
            self.system.hostname = hostname.clone();
        }
        if let Some(ref mirror) = overrides.mirror {
            self.repository.mirror = Some(mirror.clone());
        }
    }

    /// Distribution after validation (Ubuntu if never inferred).
    pub fn distribution(&self) -> Distribution {
        self.distro.unwrap_or_default()
    }

    pub fn profile(&self) -> &'static DistroProfile {
        self.distribution().profile()
    }

    /// Mirror URL with a trailing slash.
    pub fn mirror(&self) -> String {
        let mirror = self
            .repository
            .mirror
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.profile().default_mirror);
        if mirror.ends_with('/') {
            mirror.to_string()
        } else {
            format!("{}/", mirror)
        }
    }

    /// Essential package list, falling back to the distribution defaults.
    pub fn essential_packages(&self) -> Vec<String> {
        if self.packages.essential.is_empty() {
            self.profile().default_essentials(self.system.architecture)
        } else {
            self.packages.essential.clone()
        }
    }

    /// Kernel package, falling back to the distribution default.
    pub fn kernel_package(&self) -> String {
        self.packages
            .kernel
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.profile().default_kernel(self.system.architecture))
            .to_string()
    }

    /// True if the snapd suppression layer applies to this build.
    pub fn suppress_snapd(&self) -> bool {
        self.distribution() == Distribution::Ubuntu
            && (self.system.block_snapd || self.security.block_snapd_forever)
    }

    /// Validates the configuration and infers the distribution when absent.
    ///
    /// Runs before any filesystem mutation.
    pub fn validate(&mut self) -> Result<(), KagamiError> {
        let release = self.release.trim().to_string();
        if release.is_empty() {
            return Err(KagamiError::Validation("release must not be empty".to_string()));
        }
        self.release = release;

        let distro = match self.distro {
            Some(distro) => distro,
            None => Distribution::for_release(&self.release)
                .or_else(|| {
                    self.repository
                        .mirror
                        .as_deref()
                        .and_then(Distribution::for_mirror)
                })
                .ok_or_else(|| {
                    KagamiError::Validation(format!(
                        "cannot infer distribution from release '{}'; set `distro` explicitly",
                        self.release
                    ))
                })?,
        };
        if !distro.accepts_release(&self.release) {
            return Err(KagamiError::Validation(format!(
                "unsupported release '{}' for {}",
                self.release, distro
            )));
        }
        self.distro = Some(distro);

        validate_hostname(&self.system.hostname)?;
        if self.system.locale.trim().is_empty() {
            return Err(KagamiError::Validation("locale must not be empty".to_string()));
        }
        validate_timezone(&self.system.timezone)?;

        if let Some(ref mirror) = self.repository.mirror {
            validate_http_url("mirror", mirror)?;
        }

        for (index, repo) in self.repository.additional_repos.iter().enumerate() {
            validate_repo(repo)
                .map_err(|e| prefix_validation(e, &format!("additional repo {}", index + 1)))?;
        }

        self.validate_installer(distro)?;
        Ok(())
    }

    fn validate_installer(&self, distro: Distribution) -> Result<(), KagamiError> {
        let installer = &self.installer;
        if installer.kind == InstallerKind::Subiquity {
            if distro == Distribution::Debian {
                return Err(KagamiError::Validation(
                    "subiquity installer is only available on Ubuntu".to_string(),
                ));
            }
            if self.suppress_snapd() {
                return Err(KagamiError::Validation(
                    "subiquity installer requires snapd; disable block_snapd and block_snapd_forever"
                        .to_string(),
                ));
            }
        }

        if let Some(ref slideshow) = installer.slideshow
            && !slideshow.is_empty()
            && installer.kind == InstallerKind::Ubiquity
            && !SLIDESHOWS.contains(&slideshow.as_str())
        {
            return Err(KagamiError::Validation(format!(
                "unknown slideshow '{}'; expected one of: {}",
                slideshow,
                SLIDESHOWS.join(", ")
            )));
        }

        if let Some(ref dir) = installer.calamares_config {
            if installer.kind != InstallerKind::Calamares {
                return Err(KagamiError::Validation(
                    "calamares_config requires installer type calamares".to_string(),
                ));
            }
            let metadata = fs::metadata(dir).map_err(|e| {
                KagamiError::io(format!("failed to read calamares_config: {}", dir), e)
            })?;
            if !metadata.is_dir() {
                return Err(KagamiError::Validation(format!(
                    "calamares_config must be a directory: {}",
                    dir
                )));
            }
        }
        Ok(())
    }

    /// Serializes the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, KagamiError> {
        serde_yaml::to_string(self)
            .map_err(|e| KagamiError::Config(format!("failed to serialize configuration: {}", e)))
    }
}

fn validate_hostname(hostname: &str) -> Result<(), KagamiError> {
    let valid = !hostname.is_empty()
        && hostname.len() <= 63
        && !hostname.starts_with('-')
        && hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(KagamiError::Validation(format!("invalid hostname: '{}'", hostname)))
    }
}

/// Accepts zoneinfo names such as `UTC`, `Etc/GMT+1` or `America/Port-au-Prince`.
fn validate_timezone(timezone: &str) -> Result<(), KagamiError> {
    if timezone.is_empty() {
        return Err(KagamiError::Validation("timezone must not be empty".to_string()));
    }
    let valid = !timezone.starts_with('/')
        && timezone
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '/'));
    if valid {
        Ok(())
    } else {
        Err(KagamiError::Validation(format!("invalid timezone: '{}'", timezone)))
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<Url, KagamiError> {
    let url = Url::parse(value.trim())
        .map_err(|e| KagamiError::Validation(format!("invalid {} URL '{}': {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(KagamiError::Validation(format!(
            "{} URL must use http or https, got {}",
            field, other
        ))),
    }
}

fn validate_repo(repo: &AdditionalRepo) -> Result<(), KagamiError> {
    let valid_name = !repo.name.is_empty()
        && repo
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid_name {
        return Err(KagamiError::Validation(format!("invalid repository name: '{}'", repo.name)));
    }
    validate_http_url("repository", &repo.uri)?;
    if repo.suite.trim().is_empty() {
        return Err(KagamiError::Validation("suite must not be empty".to_string()));
    }
    repo.signing_key()?;
    Ok(())
}

fn prefix_validation(err: KagamiError, prefix: &str) -> KagamiError {
    match err {
        KagamiError::Validation(msg) => KagamiError::Validation(format!("{}: {}", prefix, msg)),
        other => other,
    }
}

/// Loads a configuration file. YAML and JSON are both accepted.
pub fn load_config(path: &Utf8Path) -> Result<BuildConfig, KagamiError> {
    let content = fs::read_to_string(path).map_err(|e| KagamiError::io(path.as_str(), e))?;
    serde_yaml::from_str(&content)
        .map_err(|e| KagamiError::Config(format!("failed to parse {}: {}", path, e)))
}

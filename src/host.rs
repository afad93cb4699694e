//! Host inspection: read-only facts about the machine running the build.

use std::env;
use std::ffi::OsString;
use std::fs;

use anyhow::Result;
use camino::Utf8Path;
use tracing::debug;

use crate::executor::{CommandExecutor, CommandSpec};

/// Host packages needed to build an image.
pub const REQUIRED_HOST_PACKAGES: &[&str] = &[
    "debootstrap",
    "squashfs-tools",
    "xorriso",
    "grub-pc-bin",
    "grub-efi-amd64-bin",
    "mtools",
    "dosfstools",
    "isolinux",
    "syslinux",
    "syslinux-common",
];

/// A host tool and the package that installs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTool {
    pub name: &'static str,
    pub package: &'static str,
    /// Only needed by best-effort steps; its absence is reported, not fatal.
    pub optional: bool,
}

const fn tool(name: &'static str, package: &'static str) -> RequiredTool {
    RequiredTool {
        name,
        package,
        optional: false,
    }
}

const fn optional_tool(name: &'static str, package: &'static str) -> RequiredTool {
    RequiredTool {
        name,
        package,
        optional: true,
    }
}

/// Tools looked up on PATH before a build starts.
pub const REQUIRED_TOOLS: &[RequiredTool] = &[
    tool("debootstrap", "debootstrap"),
    tool("mksquashfs", "squashfs-tools"),
    tool("xorriso", "xorriso"),
    tool("grub-mkstandalone", "grub-common"),
    tool("mkfs.vfat", "dosfstools"),
    tool("mmd", "mtools"),
    tool("mcopy", "mtools"),
    optional_tool("gpg", "gnupg"),
    optional_tool("wget", "wget"),
    optional_tool("unzip", "unzip"),
];

/// Booleans consumed by the prerequisite phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFacts {
    pub is_linux: bool,
    pub is_apt: bool,
    pub is_root: bool,
    pub in_container: bool,
}

impl HostFacts {
    /// Probes the running host.
    pub fn detect() -> Self {
        let facts = Self {
            is_linux: cfg!(target_os = "linux"),
            is_apt: is_apt_based(Utf8Path::new("/"), env::var_os("PATH")),
            is_root: rustix::process::geteuid().is_root(),
            in_container: in_container(Utf8Path::new("/"), env::var_os("DISTROBOX_ENTER_PATH")),
        };
        debug!("host facts: {:?}", facts);
        facts
    }

    /// Actionable hint appended to mount and bootstrap failures.
    pub fn container_hint(&self, capability: &str) -> Option<String> {
        self.in_container.then(|| {
            format!(
                "running inside a container: start it with '--privileged' or grant {}",
                capability
            )
        })
    }
}

/// Distribution identifiers from the `ID=` and `ID_LIKE=` lines of an
/// os-release file, lower-cased.
pub fn os_release_ids(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            line.strip_prefix("ID=")
                .or_else(|| line.strip_prefix("ID_LIKE="))
        })
        .flat_map(|value| value.trim().trim_matches(|c| c == '"' || c == '\'').split_whitespace())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Returns true if `root` looks like an Ubuntu/Debian APT host.
///
/// `search_path` is the PATH value used to find `apt-get`, `dpkg` and `rpm`.
pub fn is_apt_based(root: &Utf8Path, search_path: Option<OsString>) -> bool {
    let found = |name: &str| tool_in_path(name, search_path.clone());
    if !found("apt-get") || !found("dpkg") {
        return false;
    }

    let ids = os_release_ids(&fs::read_to_string(root.join("etc/os-release")).unwrap_or_default());
    let has_id = |id: &str| ids.iter().any(|i| i == id);
    // APT-RPM hosts (ALT Linux) ship apt-get alongside rpm.
    if found("rpm") && has_id("altlinux") {
        return false;
    }
    if !root.join("etc/apt/sources.list").exists() && !root.join("etc/apt/sources.list.d").is_dir()
    {
        return false;
    }
    has_id("ubuntu") || has_id("debian")
}

/// Returns true if `root` shows Docker, Podman or Distrobox markers.
pub fn in_container(root: &Utf8Path, distrobox_env: Option<OsString>) -> bool {
    root.join(".dockerenv").exists()
        || root.join("run/.containerenv").exists()
        || distrobox_env.is_some_and(|v| !v.is_empty())
}

fn tool_in_path(name: &str, search_path: Option<OsString>) -> bool {
    match env::current_dir() {
        Ok(cwd) => which::which_in(name, search_path, cwd).is_ok(),
        Err(_) => false,
    }
}

/// Returns the required tools that cannot be found in `search_path`
/// (the process PATH when `None`).
pub fn missing_tools(search_path: Option<&str>) -> Vec<RequiredTool> {
    let path = search_path
        .map(OsString::from)
        .or_else(|| env::var_os("PATH"));
    REQUIRED_TOOLS
        .iter()
        .filter(|t| !tool_in_path(t.name, path.clone()))
        .copied()
        .collect()
}

/// Returns the required host packages that are not installed.
pub fn missing_host_packages(executor: &dyn CommandExecutor) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for package in REQUIRED_HOST_PACKAGES {
        let spec = CommandSpec::new(
            "dpkg-query",
            vec!["-W".to_string(), "-f=${Status}".to_string(), package.to_string()],
        )
        .capturing();
        let result = executor.execute(&spec)?;
        if !result.success() || !result.stdout_lossy().contains("install ok installed") {
            missing.push(package.to_string());
        }
    }
    Ok(missing)
}

/// Installs the given host packages with apt.
pub fn install_host_packages(executor: &dyn CommandExecutor, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    executor.execute_checked(&CommandSpec::new("apt-get", vec!["update".to_string()]))?;
    let mut args = vec!["install".to_string(), "-y".to_string()];
    args.extend(packages.iter().cloned());
    executor.execute_checked(
        &CommandSpec::new("apt-get", args).with_env("DEBIAN_FRONTEND", "noninteractive"),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    fn utf8(dir: &tempfile::TempDir) -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn fake_tool(dir: &Utf8Path, name: &str) {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn container_markers() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8(&temp);
        assert!(!in_container(&root, None));
        assert!(in_container(&root, Some(OsString::from("/usr/bin/distrobox-enter"))));
        assert!(!in_container(&root, Some(OsString::new())));
        fs::create_dir_all(root.join("run")).unwrap();
        fs::write(root.join("run/.containerenv"), "").unwrap();
        assert!(in_container(&root, None));
    }

    #[test]
    fn apt_host_detection() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8(&temp);
        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(root.join("etc/apt")).unwrap();
        fs::write(root.join("etc/os-release"), "ID=ubuntu\nNAME=\"Ubuntu\"\n").unwrap();
        fs::write(root.join("etc/apt/sources.list"), "").unwrap();

        let path = Some(OsString::from(bin.as_str()));
        assert!(!is_apt_based(&root, path.clone()), "no apt-get yet");

        fake_tool(&bin, "apt-get");
        fake_tool(&bin, "dpkg");
        assert!(is_apt_based(&root, path.clone()));

        // Names merely containing "alt" are not ALT Linux.
        fake_tool(&bin, "rpm");
        fs::write(root.join("etc/os-release"), "NAME=\"SaltOS\"\nID=saltos\nID_LIKE=debian\n")
            .unwrap();
        assert!(is_apt_based(&root, path.clone()));

        fs::write(root.join("etc/os-release"), "ID=altlinux\n").unwrap();
        assert!(!is_apt_based(&root, path.clone()));

        fs::write(root.join("etc/os-release"), "ID=fedora\n").unwrap();
        assert!(!is_apt_based(&root, path));
    }

    #[test]
    fn missing_tools_reports_packages() {
        let temp = tempfile::tempdir().unwrap();
        let bin = utf8(&temp);
        for t in REQUIRED_TOOLS.iter().filter(|t| t.name != "xorriso") {
            fake_tool(&bin, t.name);
        }
        let missing = missing_tools(Some(bin.as_str()));
        assert_eq!(missing.len(), 1);
        assert_eq!((missing[0].name, missing[0].optional), ("xorriso", false));
    }

    #[test]
    fn download_tools_are_optional() {
        for name in ["gpg", "wget", "unzip"] {
            let entry = REQUIRED_TOOLS.iter().find(|t| t.name == name).unwrap();
            assert!(entry.optional, "{} should be optional", name);
        }
        assert!(REQUIRED_TOOLS.iter().filter(|t| !t.optional).any(|t| t.name == "mksquashfs"));
    }

    #[test]
    fn os_release_ids_are_exact_tokens() {
        let mint = "NAME=\"Linux Mint\"\nID=linuxmint\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(os_release_ids(mint), ["linuxmint", "ubuntu", "debian"]);
        let alt = "NAME=\"ALT Workstation\"\nID=altlinux\n";
        assert_eq!(os_release_ids(alt), ["altlinux"]);
        let cobalt = "NAME=\"Cobalt\"\nID=cobalt\nID_LIKE=debian\n";
        assert_eq!(os_release_ids(cobalt), ["cobalt", "debian"]);
    }

    #[test]
    fn container_hint_only_in_containers() {
        let mut facts = HostFacts {
            is_linux: true,
            is_apt: true,
            is_root: true,
            in_container: false,
        };
        assert!(facts.container_hint("CAP_SYS_ADMIN").is_none());
        facts.in_container = true;
        assert!(facts.container_hint("CAP_SYS_ADMIN").unwrap().contains("CAP_SYS_ADMIN"));
    }

    struct DpkgStub {
        installed: Vec<&'static str>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl CommandExecutor for DpkgStub {
        fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
            self.calls.lock().unwrap().push(spec.argv());
            if spec.command != "dpkg-query" {
                return Ok(ExecutionResult {
                    status: ExitStatus::from_raw(0),
                    stdout: Vec::new(),
                });
            }
            let installed = spec.args.last().is_some_and(|p| self.installed.contains(&p.as_str()));
            let stdout = if installed {
                b"install ok installed".to_vec()
            } else {
                b"deinstall ok config-files".to_vec()
            };
            Ok(ExecutionResult {
                status: ExitStatus::from_raw(0),
                stdout,
            })
        }
    }

    #[test]
    fn missing_host_packages_and_install() {
        let stub = DpkgStub {
            installed: REQUIRED_HOST_PACKAGES
                .iter()
                .copied()
                .filter(|p| *p != "mtools" && *p != "xorriso")
                .collect(),
            calls: Mutex::new(Vec::new()),
        };
        let missing = missing_host_packages(&stub).unwrap();
        assert_eq!(missing, vec!["xorriso".to_string(), "mtools".to_string()]);

        install_host_packages(&stub, &missing).unwrap();
        let calls = stub.calls.lock().unwrap();
        let install = calls.last().unwrap();
        assert_eq!(install[..3], ["apt-get", "install", "-y"]);
        assert!(install.contains(&"mtools".to_string()));
    }
}

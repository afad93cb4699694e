use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use kagami::chroot::MountTable;
use kagami::config::{BuildConfig, Desktop, InstallerKind};
use kagami::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use kagami::host::{HostFacts, REQUIRED_TOOLS};
use kagami::pipeline::{BuildContext, BuildEnvironment};
use kagami::workspace::Workspace;
use tempfile::TempDir;

/// Kernel version laid out by the fake debootstrap.
#[allow(dead_code)]
pub const KERNEL_VERSION: &str = "6.8.0-31-generic";

/// Relative path of the GRUB EFI binary placed in the fake chroot.
#[allow(dead_code)]
pub const CHROOT_GRUB_EFI: &str = "usr/lib/grub/x86_64-efi/monolithic/grubx64.efi";

const DPKG_MANIFEST: &str = "adduser\t3.118ubuntu5\ncalamares\t3.2.61-1\ncasper\t1.470\nsudo\t1.9.9\n";

/// Lays out the files debootstrap and the kernel packages would leave behind.
#[allow(dead_code)]
pub fn populate_chroot(chroot: &Utf8Path, with_grub_efi: bool) {
    for dir in ["etc", "boot", "usr/lib", "tmp", "var/lib"] {
        fs::create_dir_all(chroot.join(dir)).unwrap();
    }
    fs::write(chroot.join("boot").join(format!("vmlinuz-{}", KERNEL_VERSION)), b"kernel").unwrap();
    fs::write(chroot.join("boot").join(format!("initrd.img-{}", KERNEL_VERSION)), b"initrd")
        .unwrap();
    if with_grub_efi {
        let grub = chroot.join(CHROOT_GRUB_EFI);
        fs::create_dir_all(grub.parent().unwrap()).unwrap();
        fs::write(grub, b"grub efi").unwrap();
    }
}

fn status(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Simulates the host tools a build drives.
///
/// Every command is recorded. Commands whose command line contains one of
/// `failing` exit with status 1. A command matching a scripted response
/// prints it and succeeds; any other `wget` fails so no test touches the
/// network.
pub struct FakeToolchain {
    calls: Mutex<Vec<Vec<String>>>,
    failing: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, String)>>,
    mount_table: Utf8PathBuf,
    grub_efi: bool,
}

impl FakeToolchain {
    pub fn new(mount_table: &Utf8Path) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            mount_table: mount_table.to_owned(),
            grub_efi: true,
        }
    }

    /// The fake debootstrap leaves no GRUB EFI binary behind.
    #[allow(dead_code)]
    pub fn without_grub_efi(mut self) -> Self {
        self.grub_efi = false;
        self
    }

    /// Makes every command whose command line contains `fragment` fail.
    #[allow(dead_code)]
    pub fn fail_on(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    /// Commands whose command line contains `fragment` print `body`.
    #[allow(dead_code)]
    pub fn respond(&self, fragment: &str, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((fragment.to_string(), body.to_string()));
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls of `command`.
    #[allow(dead_code)]
    pub fn calls_of(&self, command: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c[0] == command)
            .collect()
    }

    /// Scripts run inside the chroot, in order.
    #[allow(dead_code)]
    pub fn chroot_scripts(&self) -> Vec<String> {
        self.calls_of("chroot")
            .into_iter()
            .filter_map(|c| c.get(4).cloned())
            .collect()
    }

    fn mounted(&self) -> Vec<String> {
        fs::read_to_string(&self.mount_table)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn write_table(&self, lines: &[String]) {
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&self.mount_table, content).unwrap();
    }

    fn simulate(&self, spec: &CommandSpec) -> Result<Vec<u8>> {
        let args = &spec.args;
        let mut stdout = Vec::new();
        match spec.command.as_str() {
            "debootstrap" => {
                let target = &args[args.len() - 2];
                populate_chroot(Utf8Path::new(target), self.grub_efi);
            }
            "mount" => {
                let target = &args[args.len() - 1];
                let mut lines = self.mounted();
                lines.push(format!("fake {} fake rw 0 0", target));
                self.write_table(&lines);
            }
            "umount" => {
                let target = &args[args.len() - 1];
                let lines: Vec<_> = self
                    .mounted()
                    .into_iter()
                    .filter(|l| l.split_whitespace().nth(1) != Some(target.as_str()))
                    .collect();
                self.write_table(&lines);
            }
            "mksquashfs" => fs::write(&args[1], b"hsqs")?,
            "grub-mkstandalone" => {
                if let Some(output) = args.iter().find_map(|a| a.strip_prefix("--output=")) {
                    fs::write(output, b"core")?;
                }
            }
            "xorriso" => {
                if let Some(output) = value_after(args, "-output") {
                    fs::write(output, b"CD001")?;
                }
            }
            "du" => stdout = format!("734003200\t{}\n", args[args.len() - 1]).into_bytes(),
            "md5sum" => {
                for file in args {
                    stdout.extend(format!("d41d8cd98f00b204e9800998ecf8427e  {}\n", file).bytes());
                }
            }
            "chroot" => {
                if args.get(3).is_some_and(|s| s.contains("dpkg-query")) {
                    stdout = DPKG_MANIFEST.as_bytes().to_vec();
                }
            }
            _ => {}
        }
        Ok(stdout)
    }
}

impl CommandExecutor for FakeToolchain {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let argv = spec.argv();
        let line = argv.join(" ");
        self.calls.lock().unwrap().push(argv);

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| line.contains(fragment.as_str()))
            .map(|(_, body)| body.clone());
        if let Some(body) = scripted {
            return Ok(ExecutionResult {
                status: status(0),
                stdout: body.into_bytes(),
            });
        }

        let fails = spec.command == "wget"
            || self
                .failing
                .lock()
                .unwrap()
                .iter()
                .any(|f| line.contains(f.as_str()));
        if fails {
            return Ok(ExecutionResult {
                status: status(1),
                stdout: Vec::new(),
            });
        }

        let stdout = self.simulate(spec)?;
        Ok(ExecutionResult {
            status: status(0),
            stdout,
        })
    }
}

/// A throwaway host: workspace, host root, mount table and tool directory.
pub struct TestBed {
    _temp: TempDir,
    pub base: Utf8PathBuf,
    pub host_root: Utf8PathBuf,
    pub mount_table: Utf8PathBuf,
    pub tool_dir: Utf8PathBuf,
    pub workspace: Workspace,
    pub output: Utf8PathBuf,
}

impl TestBed {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(fs::canonicalize(temp.path()).unwrap()).unwrap();

        let host_root = base.join("host");
        let grub_pc = host_root.join("usr/lib/grub/i386-pc");
        fs::create_dir_all(&grub_pc).unwrap();
        fs::write(grub_pc.join("cdboot.img"), b"cdboot").unwrap();
        fs::write(grub_pc.join("boot_hybrid.img"), b"mbr").unwrap();

        let mount_table = base.join("mounts");
        fs::write(&mount_table, "proc /proc proc rw 0 0\n").unwrap();

        let tool_dir = base.join("bin");
        fs::create_dir_all(&tool_dir).unwrap();
        for tool in REQUIRED_TOOLS {
            let path = tool_dir.join(tool.name);
            fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let workspace = Workspace::new(&base.join("work")).unwrap();
        let output = base.join("out/kagami.iso");
        Self {
            _temp: temp,
            base,
            host_root,
            mount_table,
            tool_dir,
            workspace,
            output,
        }
    }

    pub fn env(&self) -> BuildEnvironment {
        BuildEnvironment {
            host: HostFacts {
                is_linux: true,
                is_apt: true,
                is_root: true,
                in_container: false,
            },
            host_root: self.host_root.clone(),
            mount_table: MountTable::at(self.mount_table.clone()),
            tool_path: Some(self.tool_dir.to_string()),
            unmount_retry_delay: Duration::from_millis(1),
        }
    }

    pub fn toolchain(&self) -> Arc<FakeToolchain> {
        Arc::new(FakeToolchain::new(&self.mount_table))
    }

    #[allow(dead_code)]
    pub fn context(&self, config: BuildConfig, executor: Arc<FakeToolchain>) -> BuildContext {
        BuildContext::new(
            config,
            self.workspace.clone(),
            self.output.clone(),
            self.env(),
            executor,
        )
        .unwrap()
    }

    /// Mount points currently listed in the fake mount table.
    #[allow(dead_code)]
    pub fn mounted(&self) -> Vec<Utf8PathBuf> {
        MountTable::at(self.mount_table.clone())
            .mount_points()
            .unwrap()
    }
}

/// Ubuntu jammy with Calamares, no desktop and snapd blocked.
#[allow(dead_code)]
pub fn jammy_config() -> BuildConfig {
    let mut config = BuildConfig::default_for("jammy");
    config.packages.desktop = Desktop::None;
    config.installer.kind = InstallerKind::Calamares;
    config.installer.slideshow = None;
    config.system.block_snapd = true;
    config
}

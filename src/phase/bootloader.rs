//! Kernel staging, memtest86+ and the GRUB boot menu.

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::config::{Architecture, InstallerKind};
use crate::error::KagamiError;
use crate::executor::CommandSpec;
use crate::pipeline::BuildContext;

/// Marker searched for by the boot menu to find the boot device.
pub const ROOT_MARKER: &str = "kagami-live";

pub const MEMTEST_URL: &str = "https://memtest.org/download/v7.00/mt86plus_7.00.binaries.zip";

/// Inputs of the boot menu template.
#[derive(Debug, Clone)]
pub struct GrubMenu {
    pub dist_name: String,
    pub live_dir: String,
    pub boot_parameter: String,
    pub installer: InstallerKind,
    pub memtest: bool,
}

impl GrubMenu {
    fn entry(&self, title: &str, options: &str) -> String {
        format!(
            "menuentry \"{title}\" {{\n   linux /{live}/vmlinuz {boot} {options}\n   initrd /{live}/initrd\n}}\n",
            title = title,
            live = self.live_dir,
            boot = self.boot_parameter,
            options = options,
        )
    }

    /// Renders `grub.cfg`.
    pub fn render(&self) -> String {
        let mut cfg = format!(
            "search --set=root --file /{}\n\n\
             insmod all_video\n\
             insmod part_gpt\n\
             insmod part_msdos\n\
             insmod fat\n\
             insmod iso9660\n\n\
             set default=\"0\"\n\
             set timeout=30\n\n",
            ROOT_MARKER
        );

        cfg.push_str(&self.entry(
            &format!("Try {} without installing", self.dist_name),
            "nopersistent toram quiet splash ---",
        ));
        cfg.push('\n');
        let install_options = match self.installer {
            InstallerKind::Ubiquity => "only-ubiquity quiet splash ---",
            InstallerKind::Calamares | InstallerKind::Subiquity => "quiet splash ---",
        };
        cfg.push_str(&self.entry(&format!("Install {}", self.dist_name), install_options));
        cfg.push('\n');
        cfg.push_str(&self.entry("Check disc for defects", "integrity-check quiet splash ---"));
        cfg.push('\n');

        cfg.push_str("grub_platform\nif [ \"$grub_platform\" = \"efi\" ]; then\n");
        cfg.push_str("menuentry 'UEFI Firmware Settings' {\n   fwsetup\n}\n");
        if self.memtest {
            cfg.push_str(
                "\nmenuentry \"Test memory Memtest86+ (UEFI)\" {\n   linux /install/memtest86+.efi\n}\n\
                 else\n\
                 menuentry \"Test memory Memtest86+ (BIOS)\" {\n   linux16 /install/memtest86+.bin\n}\n",
            );
        }
        cfg.push_str("fi\n");
        cfg
    }
}

/// Splits a file name into text and numeric runs for natural ordering.
fn version_key(name: &str) -> Vec<(u64, String)> {
    let mut key = Vec::new();
    let mut rest = name;
    while let Some(first) = rest.chars().next() {
        let numeric = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != numeric)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        key.push(match chunk.parse::<u64>() {
            Ok(n) if numeric => (n, String::new()),
            _ => (0, chunk.to_string()),
        });
        rest = tail;
    }
    key
}

/// Newest file in `dir` named `<prefix><anything containing suffix>`.
fn newest_matching(dir: &Utf8Path, prefix: &str, suffix: &str) -> Result<Option<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            name.strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.contains(suffix))
        })
        .collect();
    names.sort_by_key(|name| version_key(name));
    Ok(names.pop())
}

/// Kernel and initramfs located under the chroot's `/boot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFiles {
    pub kernel: Utf8PathBuf,
    pub initrd: Utf8PathBuf,
}

/// Finds the kernel whose name contains `suffix`, falling back to any
/// `vmlinuz-*`, and the initramfs matching its version.
pub fn find_boot_files(boot_dir: &Utf8Path, suffix: &str) -> Result<BootFiles> {
    let kernel = match newest_matching(boot_dir, "vmlinuz-", suffix)? {
        Some(name) => name,
        None => newest_matching(boot_dir, "vmlinuz-", "")?.ok_or_else(|| {
            KagamiError::MissingComponent(format!("no kernel image found in {}", boot_dir))
        })?,
    };
    let version = kernel.trim_start_matches("vmlinuz-");
    let exact = format!("initrd.img-{}", version);
    let initrd = if boot_dir.join(&exact).is_file() {
        exact
    } else {
        newest_matching(boot_dir, "initrd.img-", suffix)?
            .or(newest_matching(boot_dir, "initrd.img-", "")?)
            .ok_or_else(|| {
                KagamiError::MissingComponent(format!("no initramfs found in {}", boot_dir))
            })?
    };
    Ok(BootFiles {
        kernel: boot_dir.join(kernel),
        initrd: boot_dir.join(initrd),
    })
}

/// Name stem of the memtest86+ binaries inside the release archive.
fn memtest_stem(arch: Architecture) -> Option<&'static str> {
    match arch {
        Architecture::Amd64 => Some("memtest64"),
        Architecture::I386 => Some("memtest32"),
        Architecture::Arm64 => None,
    }
}

/// Phase 11: stages kernel, initrd and memtest, then writes the boot menu.
pub fn configure_bootloader(ctx: &mut BuildContext) -> Result<()> {
    let arch = ctx.config.system.architecture;
    let suffix = ctx
        .profile
        .kernel_suffix(ctx.config.packages.kernel.as_deref(), arch);
    let boot = find_boot_files(&ctx.chroot_path("boot"), suffix)?;
    info!("using kernel {}", boot.kernel);

    let live_dir = ctx.live_dir();
    fs::create_dir_all(&live_dir).with_context(|| format!("failed to create {}", live_dir))?;
    for (source, name) in [(&boot.kernel, "vmlinuz"), (&boot.initrd, "initrd")] {
        let dest = live_dir.join(name);
        fs::copy(source, &dest)
            .map_err(|e| KagamiError::io(format!("failed to copy {} to {}", source, dest), e))?;
    }

    let mut memtest = false;
    if let Some(stem) = memtest_stem(arch) {
        let mut steps = ctx.best_effort();
        memtest = steps.attempt("memtest86+", || install_memtest(ctx, stem));
        ctx.reports.push(steps.finish());
    } else {
        warn!("memtest86+ is not available for {}", arch);
    }

    let menu = GrubMenu {
        dist_name: ctx.dist_name(),
        live_dir: ctx.profile.live_dir.to_string(),
        boot_parameter: ctx.profile.boot_parameter(),
        installer: ctx.config.installer.kind,
        memtest,
    };
    let cfg_path = ctx.workspace.isolinux_dir().join("grub.cfg");
    fs::write(&cfg_path, menu.render())
        .map_err(|e| KagamiError::io(format!("failed to write {}", cfg_path), e))?;

    let marker = ctx.image_path(ROOT_MARKER);
    fs::write(&marker, b"")
        .map_err(|e| KagamiError::io(format!("failed to write {}", marker), e))?;
    Ok(())
}

/// Downloads the memtest86+ release and extracts the EFI and BIOS images.
fn install_memtest(ctx: &BuildContext, stem: &str) -> Result<()> {
    let install_dir = ctx.workspace.install_dir();
    fs::create_dir_all(&install_dir)
        .with_context(|| format!("failed to create {}", install_dir))?;
    let archive = install_dir.join("memtest86+.zip");
    ctx.run(
        "wget",
        vec!["-qO".to_string(), archive.to_string(), MEMTEST_URL.to_string()],
    )?;

    for (member, dest) in [
        (format!("{}.bin", stem), "memtest86+.bin"),
        (format!("{}.efi", stem), "memtest86+.efi"),
    ] {
        let spec = CommandSpec::new(
            "unzip",
            vec!["-p".to_string(), archive.to_string(), member.clone()],
        )
        .capturing();
        let result = ctx.executor.execute_checked(&spec)?;
        if result.stdout.is_empty() {
            anyhow::bail!("{} missing from {}", member, MEMTEST_URL);
        }
        let path = install_dir.join(dest);
        fs::write(&path, &result.stdout).with_context(|| format!("failed to write {}", path))?;
    }
    fs::remove_file(&archive).with_context(|| format!("failed to remove {}", archive))?;
    Ok(())
}

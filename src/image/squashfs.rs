use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::info;

use crate::args::CommandArgsBuilder;
use crate::config::Architecture;
use crate::error::KagamiError;
use crate::pipeline::BuildContext;

/// Paths left out of the compressed root filesystem.
const EXCLUDES: &[&str] = &[
    "var/cache/apt/archives/*",
    "root/*",
    "root/.*",
    "tmp/*",
    "tmp/.*",
    "swapfile",
    "image",
    "dev/*",
    "run/*",
    "proc/*",
    "sys/*",
];

/// Arguments for `mksquashfs`. Extended attributes are dropped inside
/// containers, where they usually cannot be read.
///
/// `-e` consumes every argument after it, so the exclude list comes last.
pub fn mksquashfs_args(chroot: &Utf8Path, output: &Utf8Path, in_container: bool) -> Vec<String> {
    let mut args = CommandArgsBuilder::new();
    args.push_arg(chroot.as_str());
    args.push_arg(output.as_str());
    args.push_args([
        "-noappend",
        "-no-duplicates",
        "-no-recovery",
        "-wildcards",
        "-comp",
        "xz",
        "-b",
        "1M",
        "-Xdict-size",
        "100%",
    ]);
    args.push_flag_if("-no-xattrs", in_container);
    args.push_flag("-e");
    args.push_args(EXCLUDES.iter().copied());
    args.into_args()
}

/// Extracts the byte count from `du -sx --block-size=1` output.
pub fn parse_du_size(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}

/// Renders `README.diskdefines`.
pub fn disk_defines(disk_name: &str, arch: Architecture) -> String {
    format!(
        "#define DISKNAME  {name}\n\
         #define TYPE  binary\n\
         #define TYPEbinary  1\n\
         #define ARCH  {arch}\n\
         #define ARCH{arch}  1\n\
         #define DISKNUM  1\n\
         #define DISKNUM1  1\n\
         #define TOTALNUM  0\n\
         #define TOTALNUM0  1\n",
        name = disk_name,
        arch = arch,
    )
}

pub(super) fn build_squashfs(ctx: &BuildContext) -> Result<()> {
    let output = ctx.live_dir().join("filesystem.squashfs");
    if output.exists() {
        fs::remove_file(&output)
            .map_err(|e| KagamiError::io(format!("failed to remove {}", output), e))?;
    }
    info!("compressing {} into {}", ctx.workspace.chroot_dir, output);
    ctx.run(
        "mksquashfs",
        mksquashfs_args(&ctx.workspace.chroot_dir, &output, ctx.env.host.in_container),
    )?;
    Ok(())
}

pub(super) fn write_size(ctx: &BuildContext) -> Result<()> {
    let output = ctx.capture(
        "du",
        vec![
            "-sx".to_string(),
            "--block-size=1".to_string(),
            ctx.workspace.chroot_dir.to_string(),
        ],
    )?;
    let size = parse_du_size(&output)
        .with_context(|| format!("unexpected du output: {}", output.trim()))?;
    let path = ctx.live_dir().join("filesystem.size");
    fs::write(&path, format!("{}\n", size))
        .map_err(|e| KagamiError::io(format!("failed to write {}", path), e))?;
    Ok(())
}

pub(super) fn write_disk_defines(ctx: &BuildContext) -> Result<()> {
    let name = format!("{} {}", ctx.dist_name(), ctx.codename());
    let path = ctx.image_path("README.diskdefines");
    fs::write(&path, disk_defines(&name, ctx.config.system.architecture))
        .map_err(|e| KagamiError::io(format!("failed to write {}", path), e))?;
    Ok(())
}

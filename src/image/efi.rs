use std::fs::File;

use anyhow::Result;
use camino::Utf8Path;

use super::loaders::EfiLoaders;
use crate::error::KagamiError;
use crate::pipeline::BuildContext;

/// Size of the FAT image holding the EFI loaders.
const EFI_IMAGE_SIZE: u64 = 10 * 1024 * 1024;

/// Directories created inside the FAT image.
const EFI_DIRS: &[&str] = &["efi", "efi/ubuntu", "efi/debian", "efi/boot"];

/// Locations of `grub.cfg` inside the FAT image.
const GRUB_CFG_DIRS: &[&str] = &["::efi/boot/", "::efi/ubuntu/", "::efi/debian/"];

fn mtools_args(image: &Utf8Path, rest: &[&str]) -> Vec<String> {
    let mut args = vec!["-i".to_string(), image.to_string()];
    args.extend(rest.iter().map(|s| s.to_string()));
    args
}

/// Builds `isolinux/efiboot.img`: a FAT16 image with the loaders and the
/// boot menu.
pub(super) fn build_efi_image(ctx: &BuildContext, loaders: &EfiLoaders) -> Result<()> {
    let staging = ctx.workspace.isolinux_dir();
    let image = staging.join("efiboot.img");
    let file = File::create(&image)
        .map_err(|e| KagamiError::io(format!("failed to create {}", image), e))?;
    file.set_len(EFI_IMAGE_SIZE)
        .map_err(|e| KagamiError::io(format!("failed to size {}", image), e))?;
    drop(file);

    ctx.run("mkfs.vfat", vec!["-F".to_string(), "16".to_string(), image.to_string()])?;
    ctx.run("mmd", mtools_args(&image, EFI_DIRS))?;

    for (_, path) in &loaders.files {
        ctx.run("mcopy", mtools_args(&image, &[path.as_str(), "::efi/boot/"]))?;
    }
    let grub_cfg = staging.join("grub.cfg");
    for dir in GRUB_CFG_DIRS {
        ctx.run("mcopy", mtools_args(&image, &[grub_cfg.as_str(), *dir]))?;
    }
    Ok(())
}

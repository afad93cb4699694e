//! Image synthesis: the compressed root filesystem, the boot images and the
//! final hybrid ISO.

mod bios;
mod checksum;
mod efi;
mod iso;
mod loaders;
mod manifest;
mod squashfs;

use anyhow::Result;
use tracing::info;

use crate::pipeline::BuildContext;

pub use checksum::{CHECKSUM_FILE, checksum_targets};
pub use iso::{XorrisoPlan, volume_id};
pub use loaders::{EfiLoaders, LoaderKind};
pub use manifest::{INSTALLER_FRAGMENTS, filter_manifest};
pub use squashfs::{disk_defines, mksquashfs_args, parse_du_size};

/// Phase 13: manifests, squashfs, size record and disk defines.
pub fn create_filesystem_image(ctx: &mut BuildContext) -> Result<()> {
    manifest::write_manifests(ctx)?;
    squashfs::build_squashfs(ctx)?;
    squashfs::write_size(ctx)?;
    squashfs::write_disk_defines(ctx)?;
    Ok(())
}

/// Phase 14: boot images, checksums and the final xorriso run.
pub fn create_iso(ctx: &mut BuildContext) -> Result<()> {
    let loaders = loaders::stage_loaders(ctx)?;
    efi::build_efi_image(ctx, &loaders)?;
    if ctx.config.system.architecture.has_bios_boot() {
        bios::build_bios_image(ctx)?;
    }
    checksum::write_checksums(ctx)?;
    iso::master_iso(ctx, &loaders)?;
    info!("image written to {}", ctx.output);
    Ok(())
}

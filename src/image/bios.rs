use std::fs;

use anyhow::Result;
use camino::Utf8Path;
use tracing::info;

use crate::args::{CommandArgsBuilder, FlagValueStyle};
use crate::error::KagamiError;
use crate::pipeline::BuildContext;

pub const CDBOOT_IMAGE: &str = "/usr/lib/grub/i386-pc/cdboot.img";

/// Arguments for building the standalone BIOS core image.
pub fn mkstandalone_args(core: &Utf8Path, grub_cfg: &Utf8Path) -> Vec<String> {
    let mut args = CommandArgsBuilder::new();
    args.push_flag_value("--format", "i386-pc", FlagValueStyle::Equals);
    args.push_flag_value("--output", core.as_str(), FlagValueStyle::Equals);
    args.push_flag_value(
        "--install-modules",
        "linux16 linux normal iso9660 biosdisk memdisk search tar ls",
        FlagValueStyle::Equals,
    );
    args.push_flag_value(
        "--modules",
        "linux16 linux normal iso9660 biosdisk search",
        FlagValueStyle::Equals,
    );
    args.push_arg("--locales=");
    args.push_arg("--fonts=");
    args.push_arg(format!("boot/grub/grub.cfg={}", grub_cfg));
    args.into_args()
}

/// Builds `isolinux/bios.img` from the host's `cdboot.img` and a freshly
/// built standalone core image.
pub(super) fn build_bios_image(ctx: &BuildContext) -> Result<()> {
    let staging = ctx.workspace.isolinux_dir();
    let core = staging.join("core.img");
    ctx.run(
        "grub-mkstandalone",
        mkstandalone_args(&core, &staging.join("grub.cfg")),
    )?;

    let cdboot = ctx.env.host_path(CDBOOT_IMAGE);
    if !cdboot.is_file() {
        return Err(KagamiError::MissingComponent(format!(
            "mandatory file {} not found (install grub-pc-bin)",
            CDBOOT_IMAGE
        ))
        .into());
    }
    let mut image =
        fs::read(&cdboot).map_err(|e| KagamiError::io(format!("failed to read {}", cdboot), e))?;
    let core_bytes =
        fs::read(&core).map_err(|e| KagamiError::io(format!("failed to read {}", core), e))?;
    image.extend_from_slice(&core_bytes);

    let bios = staging.join("bios.img");
    fs::write(&bios, image).map_err(|e| KagamiError::io(format!("failed to write {}", bios), e))?;
    info!("BIOS boot image written to {}", bios);
    Ok(())
}

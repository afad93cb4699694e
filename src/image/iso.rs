//! Disc mastering with xorriso.

use std::fs;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use super::loaders::{EfiLoaders, LoaderKind};
use crate::args::CommandArgsBuilder;
use crate::config::Architecture;
use crate::error::KagamiError;
use crate::pipeline::BuildContext;

pub const HYBRID_MBR_IMAGE: &str = "/usr/lib/grub/i386-pc/boot_hybrid.img";

/// GPT type GUID of the appended EFI system partition.
const EFI_PARTITION_TYPE: &str = "28732ac11ff8d211ba4b00a0c93ec93b";
/// MBR partition type GUID of the ISO partition.
const ISO_MBR_PART_TYPE: &str = "a2a0d0ebe5b9334487c068b6b72699c7";

/// ISO9660 volume identifiers are at most 32 characters.
const VOLID_MAX: usize = 32;

/// `KAGAMI_<RELEASE>_<ARCH>`, upper-cased and limited to the ISO9660
/// d-character set.
pub fn volume_id(codename: &str, arch: Architecture) -> String {
    let raw = format!("KAGAMI_{}_{}", codename, arch).to_uppercase();
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(VOLID_MAX)
        .collect()
}

/// Everything xorriso needs to master the image.
#[derive(Debug, Clone)]
pub struct XorrisoPlan {
    pub volume_id: String,
    pub output: Utf8PathBuf,
    pub image_dir: Utf8PathBuf,
    pub arch: Architecture,
    /// Host `boot_hybrid.img`, when present.
    pub hybrid_mbr: Option<Utf8PathBuf>,
    pub loaders: EfiLoaders,
}

impl XorrisoPlan {
    fn staged(&self, name: &str) -> Utf8PathBuf {
        self.image_dir.join("isolinux").join(name)
    }

    pub fn args(&self) -> Vec<String> {
        let bios = self.arch.has_bios_boot();
        let efiboot = self.staged("efiboot.img");
        let grub_cfg = self.staged("grub.cfg");

        let mut args = CommandArgsBuilder::new();
        args.push_args([
            "-as",
            "mkisofs",
            "-iso-level",
            "3",
            "-full-iso9660-filenames",
            "-J",
            "-J",
            "-joliet-long",
            "-volid",
        ]);
        args.push_arg(self.volume_id.as_str());
        args.push_arg("-output");
        args.push_arg(self.output.as_str());

        if bios {
            args.push_args([
                "-eltorito-boot",
                "isolinux/bios.img",
                "-no-emul-boot",
                "-boot-load-size",
                "4",
                "-boot-info-table",
                "--eltorito-catalog",
                "boot.catalog",
                "--grub2-boot-info",
            ]);
            if let Some(ref mbr) = self.hybrid_mbr {
                args.push_arg("--grub2-mbr");
                args.push_arg(mbr.as_str());
            }
            args.push_args([
                "-partition_offset",
                "16",
                "--mbr-force-bootable",
                "-eltorito-alt-boot",
                "-no-emul-boot",
                "-e",
                "isolinux/efiboot.img",
            ]);
        } else {
            args.push_args(["-partition_offset", "16"]);
        }

        args.push_args(["-append_partition", "2", EFI_PARTITION_TYPE]);
        args.push_arg(efiboot.as_str());
        args.push_args([
            "-appended_part_as_gpt",
            "-iso_mbr_part_type",
            ISO_MBR_PART_TYPE,
            "-m",
            "isolinux/efiboot.img",
        ]);
        if bios {
            args.push_args(["-m", "isolinux/bios.img"]);
        }
        args.push_args([
            "-e",
            "--interval:appended_partition_2:::",
            "-exclude",
            "isolinux",
            "-graft-points",
        ]);

        for kind in [LoaderKind::Shim, LoaderKind::MokManager, LoaderKind::Grub] {
            let name = kind.staged_name(self.arch);
            if let Some(path) = self.loaders.get(&name) {
                args.push_arg(format!("/EFI/boot/{}={}", name, path));
            }
        }
        for target in [
            "/boot/grub/grub.cfg",
            "/EFI/boot/grub.cfg",
            "/EFI/ubuntu/grub.cfg",
            "/EFI/debian/grub.cfg",
        ] {
            args.push_arg(format!("{}={}", target, grub_cfg));
        }
        if bios {
            args.push_arg(format!("/isolinux/bios.img={}", self.staged("bios.img")));
        }
        args.push_arg(format!("/isolinux/efiboot.img={}", efiboot));
        args.push_arg(self.image_dir.as_str());
        args.into_args()
    }
}

fn remove_partial(output: &Utf8Path) {
    if output.exists()
        && let Err(e) = fs::remove_file(output)
    {
        warn!("failed to remove partial image {}: {}", output, e);
    }
}

/// Runs xorriso. A failed run leaves no image behind.
pub(super) fn master_iso(ctx: &BuildContext, loaders: &EfiLoaders) -> Result<()> {
    let arch = ctx.config.system.architecture;
    let hybrid_mbr = ctx.env.host_path(HYBRID_MBR_IMAGE);
    let hybrid_mbr = if hybrid_mbr.is_file() {
        Some(hybrid_mbr)
    } else {
        if arch.has_bios_boot() {
            warn!("{} not found, the image will not boot from USB in BIOS mode", HYBRID_MBR_IMAGE);
        }
        None
    };

    if let Some(parent) = ctx.output.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| KagamiError::io(format!("failed to create {}", parent), e))?;
    }

    let plan = XorrisoPlan {
        volume_id: volume_id(ctx.codename(), arch),
        output: ctx.output.clone(),
        image_dir: ctx.workspace.image_dir.clone(),
        arch,
        hybrid_mbr,
        loaders: loaders.clone(),
    };
    info!("mastering {} ({})", plan.output, plan.volume_id);
    if let Err(e) = ctx.run("xorriso", plan.args()) {
        remove_partial(&ctx.output);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_is_upper_case() {
        assert_eq!(volume_id("jammy", Architecture::Amd64), "KAGAMI_JAMMY_AMD64");
        assert_eq!(volume_id("sid", Architecture::Arm64), "KAGAMI_SID_ARM64");
        assert!(volume_id("a-very-long-development-codename", Architecture::Amd64).len() <= 32);
    }

    fn plan(arch: Architecture, hybrid: bool) -> XorrisoPlan {
        let sfx = arch.efi_suffix();
        XorrisoPlan {
            volume_id: "KAGAMI_JAMMY_AMD64".to_string(),
            output: "/out/kagami.iso".into(),
            image_dir: "/w/image".into(),
            arch,
            hybrid_mbr: hybrid.then(|| "/usr/lib/grub/i386-pc/boot_hybrid.img".into()),
            loaders: EfiLoaders {
                files: vec![
                    (format!("boot{}.efi", sfx), format!("/w/image/isolinux/boot{}.efi", sfx).into()),
                    (format!("grub{}.efi", sfx), format!("/w/image/isolinux/grub{}.efi", sfx).into()),
                ],
            },
        }
    }

    #[test]
    fn bios_and_efi_layout() {
        let args = plan(Architecture::Amd64, true).args();
        let joined = args.join(" ");
        assert!(joined.starts_with(
            "-as mkisofs -iso-level 3 -full-iso9660-filenames -J -J -joliet-long -volid KAGAMI_JAMMY_AMD64 -output /out/kagami.iso -eltorito-boot isolinux/bios.img"
        ));
        assert!(joined.contains("--grub2-boot-info --grub2-mbr /usr/lib/grub/i386-pc/boot_hybrid.img -partition_offset 16"));
        assert!(joined.contains(
            "-append_partition 2 28732ac11ff8d211ba4b00a0c93ec93b /w/image/isolinux/efiboot.img -appended_part_as_gpt"
        ));
        assert!(joined.contains("-e --interval:appended_partition_2::: -exclude isolinux -graft-points"));
        assert!(args.contains(&"/EFI/boot/bootx64.efi=/w/image/isolinux/bootx64.efi".to_string()));
        assert!(!joined.contains("mmx64.efi"));
        assert!(args.contains(&"/isolinux/bios.img=/w/image/isolinux/bios.img".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/w/image"));
    }

    #[test]
    fn hybrid_mbr_is_optional() {
        let joined = plan(Architecture::Amd64, false).args().join(" ");
        assert!(!joined.contains("--grub2-mbr"));
        assert!(joined.contains("--grub2-boot-info -partition_offset 16"));
    }

    #[test]
    fn efi_only_layout() {
        let args = plan(Architecture::Arm64, false).args();
        let joined = args.join(" ");
        assert!(!joined.contains("bios.img"));
        assert!(!joined.contains("-eltorito-boot"));
        assert!(args.contains(&"/EFI/boot/grubaa64.efi=/w/image/isolinux/grubaa64.efi".to_string()));
    }
}

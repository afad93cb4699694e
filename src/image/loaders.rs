//! Locating and staging the Secure Boot shim, MokManager and GRUB EFI
//! binaries.

use std::fs;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Architecture;
use crate::error::KagamiError;
use crate::pipeline::BuildContext;

/// The three EFI binaries placed on the boot media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Shim,
    MokManager,
    Grub,
}

impl LoaderKind {
    /// File name used in the staging directory and on the image.
    pub fn staged_name(self, arch: Architecture) -> String {
        let sfx = arch.efi_suffix();
        match self {
            Self::Shim => format!("boot{}.efi", sfx),
            Self::MokManager => format!("mm{}.efi", sfx),
            Self::Grub => format!("grub{}.efi", sfx),
        }
    }

    /// Absolute paths searched on the host and then in the chroot, in order.
    pub fn candidates(self, arch: Architecture) -> Vec<String> {
        let sfx = arch.efi_suffix();
        let platform = arch.grub_efi_platform();
        match self {
            Self::Shim => vec![
                format!("/usr/lib/shim/shim{}.efi.signed", sfx),
                format!("/usr/lib/shim/shim{}.efi.signed.previous", sfx),
                format!("/usr/lib/shim/shim{}.efi", sfx),
                format!("/boot/efi/EFI/ubuntu/shim{}.efi", sfx),
                "/usr/lib/shim/shim.efi".to_string(),
            ],
            Self::MokManager => vec![
                format!("/usr/lib/shim/mm{}.efi", sfx),
                format!("/usr/lib/shim/mm{}.efi.signed", sfx),
                format!("/boot/efi/EFI/ubuntu/mm{}.efi", sfx),
            ],
            Self::Grub => vec![
                format!("/usr/lib/grub/{}-signed/grub{}.efi.signed", platform, sfx),
                format!("/usr/lib/grub/{}/monolithic/grub{}.efi", platform, sfx),
                format!("/boot/efi/EFI/ubuntu/grub{}.efi", sfx),
                format!("/usr/lib/grub/{}/grub.efi", platform),
            ],
        }
    }
}

/// Staged loader files, keyed by their image name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EfiLoaders {
    pub files: Vec<(String, Utf8PathBuf)>,
}

impl EfiLoaders {
    pub fn get(&self, name: &str) -> Option<&Utf8Path> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_path())
    }
}

/// Returns the first existing candidate, host side first.
fn locate(ctx: &BuildContext, candidates: &[String]) -> Option<Utf8PathBuf> {
    for candidate in candidates {
        for path in [ctx.env.host_path(candidate), ctx.chroot_path(candidate)] {
            if path.is_file() {
                debug!("found {}", path);
                return Some(path);
            }
        }
    }
    None
}

/// Walks the chroot's `/usr/lib` and `/boot` for a GRUB EFI binary.
fn search_chroot(ctx: &BuildContext, arch: Architecture) -> Option<Utf8PathBuf> {
    let plain = format!("grub{}.efi", arch.efi_suffix());
    let signed = format!("{}.signed", plain);
    for root in ["usr/lib", "boot"] {
        let dir = ctx.chroot_path(root);
        let found = WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                let name = entry.file_name().to_string_lossy();
                name == plain.as_str() || name == signed.as_str()
            });
        if let Some(entry) = found
            && let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path())
        {
            return Some(path);
        }
    }
    None
}

/// Copies the EFI binaries into `isolinux/`.
///
/// GRUB is mandatory. Without a shim, GRUB itself becomes the
/// removable-media loader.
pub(super) fn stage_loaders(ctx: &BuildContext) -> Result<EfiLoaders> {
    let arch = ctx.config.system.architecture;
    let staging = ctx.workspace.isolinux_dir();
    let grub_name = LoaderKind::Grub.staged_name(arch);

    let grub = locate(ctx, &LoaderKind::Grub.candidates(arch))
        .or_else(|| search_chroot(ctx, arch))
        .ok_or_else(|| {
            KagamiError::MissingComponent(format!("mandatory file {} not found", grub_name))
        })?;

    let mut loaders = EfiLoaders::default();
    let mut stage = |name: String, source: &Utf8Path| -> Result<()> {
        let dest = staging.join(&name);
        fs::copy(source, &dest)
            .map_err(|e| KagamiError::io(format!("failed to copy {} to {}", source, dest), e))?;
        loaders.files.push((name, dest));
        Ok(())
    };

    match locate(ctx, &LoaderKind::Shim.candidates(arch)) {
        Some(shim) => stage(LoaderKind::Shim.staged_name(arch), &shim)?,
        None => {
            warn!("shim not found, booting GRUB directly (Secure Boot unavailable)");
            stage(LoaderKind::Shim.staged_name(arch), &grub)?;
        }
    }
    match locate(ctx, &LoaderKind::MokManager.candidates(arch)) {
        Some(mm) => stage(LoaderKind::MokManager.staged_name(arch), &mm)?,
        None => warn!("MokManager not found, skipping"),
    }
    stage(grub_name, &grub)?;
    info!("staged {} EFI binaries", loaders.files.len());
    Ok(loaders)
}

use std::fs;

use anyhow::Result;

use crate::error::KagamiError;
use crate::pipeline::BuildContext;

/// Package name fragments removed from the live-session manifest so the
/// installer does not copy itself onto the target disk.
pub const INSTALLER_FRAGMENTS: &[&str] = &[
    "ubiquity",
    "calamares",
    "casper",
    "live-boot",
    "subiquity",
    "discover",
    "laptop-detect",
    "os-prober",
];

const DPKG_QUERY: &str = "dpkg-query -W --showformat='${Package} ${Version}\\n'";

/// Drops every manifest line containing an installer fragment.
pub fn filter_manifest(manifest: &str) -> String {
    manifest
        .lines()
        .filter(|line| !INSTALLER_FRAGMENTS.iter().any(|f| line.contains(f)))
        .map(|line| format!("{}\n", line))
        .collect()
}

/// Writes `filesystem.manifest` and `filesystem.manifest-desktop`.
pub(super) fn write_manifests(ctx: &BuildContext) -> Result<()> {
    let manifest = ctx.chroot().execute_capturing(DPKG_QUERY)?;
    let live_dir = ctx.live_dir();
    for (name, content) in [
        ("filesystem.manifest", manifest.clone()),
        ("filesystem.manifest-desktop", filter_manifest(&manifest)),
    ] {
        let path = live_dir.join(name);
        fs::write(&path, content)
            .map_err(|e| KagamiError::io(format!("failed to write {}", path), e))?;
    }
    Ok(())
}

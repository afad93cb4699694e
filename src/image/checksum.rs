use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use walkdir::WalkDir;

use crate::error::KagamiError;
use crate::executor::CommandSpec;
use crate::pipeline::BuildContext;

pub const CHECKSUM_FILE: &str = "md5sum.txt";

/// Every regular file under `image_dir` except the boot loader staging
/// directory and the checksum file itself, as sorted `./relative` paths.
pub fn checksum_targets(image_dir: &Utf8Path) -> Result<Vec<String>> {
    let mut targets = Vec::new();
    let walker = WalkDir::new(image_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == "isolinux"));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", image_dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(image_dir)
            .with_context(|| format!("{} is outside {}", entry.path().display(), image_dir))?;
        let relative = relative.to_string_lossy();
        if relative == CHECKSUM_FILE {
            continue;
        }
        targets.push(format!("./{}", relative));
    }
    targets.sort();
    Ok(targets)
}

/// Writes `md5sum.txt` in the image root.
pub(super) fn write_checksums(ctx: &BuildContext) -> Result<()> {
    let image_dir = &ctx.workspace.image_dir;
    let targets = checksum_targets(image_dir)?;
    let spec = CommandSpec::new("md5sum", targets)
        .with_cwd(image_dir.clone())
        .capturing();
    let output = ctx.executor.execute_checked(&spec)?.stdout_lossy();
    let sums: String = output
        .lines()
        .filter(|line| !line.contains("isolinux"))
        .map(|line| format!("{}\n", line))
        .collect();

    let path = image_dir.join(CHECKSUM_FILE);
    fs::write(&path, sums).map_err(|e| KagamiError::io(format!("failed to write {}", path), e))?;
    Ok(())
}

use anyhow::Result;

use crate::error::KagamiError;
use crate::host::{self, RequiredTool};
use crate::pipeline::BuildContext;

/// Phase 2: host platform, tools and privileges.
pub fn check_prerequisites(ctx: &mut BuildContext) -> Result<()> {
    let facts = ctx.env.host;
    if !facts.is_linux {
        return Err(KagamiError::Prerequisite("image builds require a Linux host".to_string()).into());
    }
    if !facts.is_apt {
        ctx.note(
            "host is not an Ubuntu/Debian APT system; consider running kagami inside an \
             Ubuntu or Debian container (e.g. Distrobox) with your home directory shared",
        );
    }

    let bios = ctx.config.system.architecture.has_bios_boot();
    let (optional, missing): (Vec<RequiredTool>, Vec<RequiredTool>) =
        host::missing_tools(ctx.env.tool_path.as_deref())
            .into_iter()
            .filter(|tool| bios || tool.name != "grub-mkstandalone")
            .partition(|tool| tool.optional);
    for tool in &optional {
        ctx.note(format!(
            "optional tool {} not found (package {}); steps needing it will be skipped",
            tool.name, tool.package
        ));
    }
    if !missing.is_empty() {
        let names: Vec<_> = missing.iter().map(|t| t.name).collect();
        let mut packages: Vec<_> = missing.iter().map(|t| t.package).collect();
        packages.dedup();
        return Err(KagamiError::Prerequisite(format!(
            "required tool(s) not found: {}. Install with: sudo apt-get install {}",
            names.join(", "),
            packages.join(" ")
        ))
        .into());
    }

    if !facts.is_root {
        return Err(
            KagamiError::Prerequisite("this program must be run as root (use sudo)".to_string())
                .into(),
        );
    }

    if facts.in_container {
        ctx.note(
            "container environment detected (Docker/Podman/Distrobox); \
             the container needs SYS_ADMIN privileges for mounting",
        );
    }
    Ok(())
}

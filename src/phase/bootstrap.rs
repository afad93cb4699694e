//! Workspace creation and the debootstrap run.

use anyhow::Result;
use tracing::info;

use crate::args::{CommandArgsBuilder, FlagValueStyle};
use crate::config::Distribution;
use crate::distro::{ReleaseInfo, UBUNTU_DEVEL_BOOTSTRAP};
use crate::error::KagamiError;
use crate::executor::CommandSpec;
use crate::pipeline::BuildContext;

/// Phase 3.
pub fn create_directories(ctx: &mut BuildContext) -> Result<()> {
    ctx.workspace.create(ctx.profile)?;
    Ok(())
}

/// Suite handed to debootstrap.
///
/// The Ubuntu development series, resolved or not, and any Ubuntu alias
/// left unresolved are bootstrapped from the latest LTS.
pub fn bootstrap_suite(distro: Distribution, release: &ReleaseInfo) -> &str {
    let development = matches!(release.alias.as_deref(), Some("devel" | "rolling"));
    match distro {
        Distribution::Ubuntu if development || distro.is_alias(&release.codename) => {
            UBUNTU_DEVEL_BOOTSTRAP
        }
        _ => &release.codename,
    }
}

/// Builds the debootstrap argument list.
pub fn debootstrap_args(ctx: &BuildContext) -> Vec<String> {
    let mut args = CommandArgsBuilder::new();
    args.push_flag_value(
        "--arch",
        &ctx.config.system.architecture.to_string(),
        FlagValueStyle::Equals,
    );
    args.push_flag_value("--variant", "minbase", FlagValueStyle::Equals);
    args.push_arg(bootstrap_suite(ctx.config.distribution(), &ctx.release));
    args.push_arg(ctx.workspace.chroot_dir.as_str());
    args.push_arg(ctx.config.mirror());
    args.into_args()
}

/// Phase 4: populates the chroot, unless `/etc` already exists there.
pub fn bootstrap_system(ctx: &mut BuildContext) -> Result<()> {
    if ctx.chroot_path("etc").is_dir() {
        ctx.note("chroot already exists, skipping bootstrap");
        return Ok(());
    }

    let suite = bootstrap_suite(ctx.config.distribution(), &ctx.release);
    if suite != ctx.codename() {
        ctx.note(format!("bootstrapping with '{}' for the {} target", suite, ctx.codename()));
    }

    let spec = CommandSpec::new("debootstrap", debootstrap_args(ctx));
    info!("running debootstrap into {}", ctx.workspace.chroot_dir);
    let result = ctx.executor.execute(&spec)?;
    if !result.success() {
        let mut err = KagamiError::execution(&spec, result.status.to_string());
        if let Some(hint) = ctx.env.host.container_hint("CAP_MKNOD to create device nodes") {
            err = KagamiError::Prerequisite(format!("{}\n[TIP] {}", err, hint));
        }
        return Err(err.into());
    }
    Ok(())
}

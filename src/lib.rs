pub mod args;
pub mod chroot;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod distro;
pub mod error;
pub mod executor;
pub mod host;
pub mod image;
pub mod phase;
pub mod pipeline;
pub mod workspace;

pub use error::KagamiError;

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::cleanup::CleanupChoice;
use crate::config::{BuildConfig, ConfigOverrides};
use crate::executor::CommandExecutor;
use crate::pipeline::{BuildContext, BuildEnvironment, BuildOutcome, CancelToken, Pipeline};
use crate::workspace::Workspace;

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Loads the configuration file, or the built-in defaults for `overrides.release`
/// when no file is given, then applies the overrides.
pub fn load_build_config(
    path: Option<&Utf8Path>,
    overrides: &ConfigOverrides,
) -> Result<BuildConfig, KagamiError> {
    let mut config = match (path, overrides.release.as_deref()) {
        (Some(path), _) => config::load_config(path)?,
        (None, Some(release)) => BuildConfig::default_for(release),
        (None, None) => {
            return Err(KagamiError::Config(
                "either a configuration file or a release is required".to_string(),
            ));
        }
    };
    config.apply_overrides(overrides);
    Ok(config)
}

/// Default image name, `kagami-<distro>-<release>-<arch>.iso`.
pub fn default_output(config: &BuildConfig) -> Utf8PathBuf {
    Utf8PathBuf::from(format!(
        "kagami-{}-{}-{}.iso",
        config.distribution(),
        config.release,
        config.system.architecture
    ))
}

/// Validates the options of `build` and prepares the pipeline context.
pub fn prepare_build(
    opts: &cli::BuildArgs,
    env: BuildEnvironment,
    executor: Arc<dyn CommandExecutor>,
) -> Result<BuildContext, KagamiError> {
    let overrides = ConfigOverrides {
        release: opts.release.clone(),
        hostname: opts.hostname.clone(),
        mirror: opts.mirror.clone(),
    };
    let config = load_build_config(opts.config.as_deref(), &overrides)?;
    let workspace = Workspace::new(&opts.workdir)?;
    let output = match opts.output {
        Some(ref output) => output.clone(),
        None => default_output(&config),
    };
    let output = Utf8PathBuf::from_path_buf(
        std::path::absolute(&output)
            .map_err(|e| KagamiError::io(format!("failed to resolve output {}", output), e))?,
    )
    .map_err(|p| KagamiError::Validation(format!("output path is not UTF-8: {}", p.display())))?;
    BuildContext::new(config, workspace, output, env, executor)
}

/// Runs the full pipeline and logs every degraded best-effort step.
pub fn run_build(ctx: &mut BuildContext) -> Result<BuildOutcome, KagamiError> {
    let outcome = Pipeline::standard().run(ctx, &CancelToken::new())?;
    let degraded = outcome.degraded_steps();
    if !degraded.is_empty() {
        warn!("{} best-effort step(s) failed:", degraded.len());
        for (phase, step) in degraded {
            warn!("  {}: {}", phase, step);
        }
    }
    info!("ISO image created: {}", outcome.iso);
    Ok(outcome)
}

pub fn run_validate(opts: &cli::ValidateArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        release: opts.release.clone(),
        ..ConfigOverrides::default()
    };
    let mut config = load_build_config(opts.config.as_deref(), &overrides)?;
    config.validate().context("configuration validation failed")?;
    info!("validation successful:\n{}", config.to_yaml()?);
    Ok(())
}

/// Reports host tools and packages missing for a build.
pub fn run_check_deps(executor: &dyn CommandExecutor) -> Result<()> {
    let (optional, tools): (Vec<_>, Vec<_>) =
        host::missing_tools(None).into_iter().partition(|t| t.optional);
    for tool in &optional {
        warn!("missing optional tool {} (package {})", tool.name, tool.package);
    }
    for tool in &tools {
        warn!("missing tool {} (package {})", tool.name, tool.package);
    }
    let packages = host::missing_host_packages(executor)?;
    if tools.is_empty() && packages.is_empty() {
        info!("all build dependencies are installed");
        return Ok(());
    }
    let mut wanted: Vec<String> = tools.iter().map(|t| t.package.to_string()).collect();
    wanted.extend(packages);
    wanted.sort();
    wanted.dedup();
    Err(KagamiError::Prerequisite(format!(
        "missing host packages: {}. Run `kagami install-deps` as root",
        wanted.join(" ")
    ))
    .into())
}

pub fn run_install_deps(executor: &dyn CommandExecutor) -> Result<()> {
    let packages = host::missing_host_packages(executor)?;
    if packages.is_empty() {
        info!("all build dependencies are installed");
        return Ok(());
    }
    info!("installing {}", packages.join(" "));
    host::install_host_packages(executor, &packages)
}

/// Unmounts and optionally deletes the workspace named by `opts`.
pub fn run_clean(
    opts: &cli::CleanArgs,
    env: &BuildEnvironment,
    executor: Arc<dyn CommandExecutor>,
) -> Result<()> {
    let workspace = Workspace::new(&opts.workdir)?;
    let choice = if opts.remove {
        CleanupChoice::Remove
    } else {
        CleanupChoice::UnmountOnly
    };
    cleanup::cleanup_workspace(&workspace, env, executor, choice, None)?;
    Ok(())
}

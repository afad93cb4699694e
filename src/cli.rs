use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a live ISO image
    Build(BuildArgs),

    /// Validate a build configuration without building
    Validate(ValidateArgs),

    /// Report missing host tools and packages
    CheckDeps(DepsArgs),

    /// Install the host packages the build requires
    InstallDeps(DepsArgs),

    /// Unmount and optionally remove a build workspace
    Clean(CleanArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Path to the YAML or JSON build configuration
    #[arg(short, long)]
    pub config: Option<Utf8PathBuf>,

    /// Release codename or alias (overrides the configuration)
    #[arg(short, long)]
    pub release: Option<String>,

    /// Working directory holding the chroot and image trees
    #[arg(short, long, default_value = "./kagami-build")]
    pub workdir: Utf8PathBuf,

    /// Output ISO path
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,

    /// Hostname of the live system (overrides the configuration)
    #[arg(long)]
    pub hostname: Option<String>,

    /// Package mirror URL (overrides the configuration)
    #[arg(long)]
    pub mirror: Option<String>,

    /// Apply the default cleanup answer without prompting
    #[arg(short, long)]
    pub yes: bool,

    /// Never delete the workspace after the build
    #[arg(long, conflicts_with = "yes")]
    pub keep_workspace: bool,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the configuration file to validate
    #[arg(short, long)]
    pub config: Option<Utf8PathBuf>,

    /// Release codename or alias (overrides the configuration)
    #[arg(short, long)]
    pub release: Option<String>,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct DepsArgs {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Working directory to clean
    #[arg(short, long, default_value = "./kagami-build")]
    pub workdir: Utf8PathBuf,

    /// Delete the workspace after unmounting
    #[arg(long)]
    pub remove: bool,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Represents log levels for controlling the verbosity of logging output.
///
/// Maps directly to the levels of the `tracing` crate; `--log-level debug`
/// also logs every external command before it runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Commands {
    /// Log level requested by the subcommand.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Build(opts) => opts.log_level,
            Self::Validate(opts) => opts.log_level,
            Self::CheckDeps(opts) | Self::InstallDeps(opts) => opts.log_level,
            Self::Clean(opts) => opts.log_level,
            Self::Completions(_) => LogLevel::Warn,
        }
    }
}

pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}

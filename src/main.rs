use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::generate;
use tracing::error;

use kagami::KagamiError;
use kagami::cleanup::{self, CleanupChoice};
use kagami::cli::{self, BuildArgs, Cli, Commands};
use kagami::executor::{CommandExecutor, RealCommandExecutor};
use kagami::pipeline::BuildEnvironment;

fn main() {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = kagami::init_logging(args.command.log_level()) {
        eprintln!("{:#}", e);
        process::exit(1);
    }

    let executor: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor);
    let result = match &args.command {
        Commands::Build(opts) => build(opts, executor),
        Commands::Validate(opts) => kagami::run_validate(opts),
        Commands::CheckDeps(_) => kagami::run_check_deps(executor.as_ref()),
        Commands::InstallDeps(_) => kagami::run_install_deps(executor.as_ref()),
        Commands::Clean(opts) => kagami::run_clean(opts, &BuildEnvironment::detect(), executor),
        Commands::Completions(opts) => {
            generate(opts.shell, &mut Cli::command(), env!("CARGO_PKG_NAME"), &mut io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn build(opts: &BuildArgs, executor: Arc<dyn CommandExecutor>) -> Result<()> {
    let env = BuildEnvironment::detect();
    let mut ctx = kagami::prepare_build(opts, env.clone(), Arc::clone(&executor))?;
    let result = kagami::run_build(&mut ctx);
    if let Err(KagamiError::Locked(_)) = result {
        // The workspace belongs to another build; leave it alone.
        return result.map(|_| ()).map_err(Into::into);
    }
    let succeeded = result.is_ok();
    if let Err(ref e) = result {
        error!("{:#}", e);
    }

    let choice = cleanup_choice(opts, succeeded, &ctx.workspace.root)?;
    let iso = result.as_ref().ok().map(|outcome| outcome.iso.clone());
    let workspace = ctx.workspace.clone();
    drop(ctx);
    cleanup::cleanup_workspace(&workspace, &env, executor, choice, iso.as_deref())
        .context("workspace cleanup failed")?;

    result.map(|_| ()).map_err(|_| anyhow::anyhow!("build failed"))
}

fn cleanup_choice(
    opts: &BuildArgs,
    succeeded: bool,
    root: &camino::Utf8Path,
) -> Result<CleanupChoice> {
    let default = CleanupChoice::default_for(succeeded);
    if opts.keep_workspace {
        return Ok(CleanupChoice::UnmountOnly);
    }
    if opts.yes {
        return Ok(default);
    }

    let hint = match default {
        CleanupChoice::Remove => "Y/n",
        CleanupChoice::UnmountOnly => "y/N",
    };
    print!("Remove workspace {}? [{}] ", root, hint);
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read answer")?;
    Ok(match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => CleanupChoice::Remove,
        "n" | "no" => CleanupChoice::UnmountOnly,
        _ => default,
    })
}

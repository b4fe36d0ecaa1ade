mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use commands::OutputFormat;
use unitsync::{AgentConfig, ManifestLoader, UnitSyncError};

#[derive(Parser, Debug)]
#[command(
    name = "unitsync",
    version,
    about = "Reconcile declarative systemd unit states against the local init system"
)]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(long, short = 'c', env = "UNITSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct ManifestArgs {
    /// Manifest file or directory. Defaults to `manifests` from the config.
    #[arg(long, short = 'f', env = "UNITSYNC_MANIFESTS")]
    file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    manifests: ManifestArgs,

    /// Use an in-memory init system instead of systemd.
    #[arg(long)]
    simulate: bool,

    /// Write the published status back into each manifest file.
    #[arg(long)]
    write: bool,

    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run one reconciliation pass per manifest and print the status.
    Apply(RunArgs),
    /// Load and validate manifests without touching the init system.
    Validate(ManifestArgs),
    /// Apply, then re-apply changed manifests and retry failed passes.
    Watch(RunArgs),
}

fn manifest_loader(args: &ManifestArgs, config: &AgentConfig) -> Result<ManifestLoader, String> {
    args.file
        .clone()
        .or_else(|| config.manifests.clone())
        .map(ManifestLoader::new)
        .ok_or_else(|| "no manifest path given, use --file or set `manifests` in the config".to_string())
}

async fn run(command: Command, config: AgentConfig) -> Result<ExitCode, UnitSyncError> {
    match command {
        Command::Validate(args) => {
            let loader = match manifest_loader(&args, &config) {
                Ok(loader) => loader,
                Err(message) => {
                    eprintln!("{}", message);
                    return Ok(ExitCode::FAILURE);
                }
            };
            let count = commands::validate(&loader)?;
            log::info!("{} manifest(s) valid", count);
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply(args) => {
            let loader = match manifest_loader(&args.manifests, &config) {
                Ok(loader) => loader,
                Err(message) => {
                    eprintln!("{}", message);
                    return Ok(ExitCode::FAILURE);
                }
            };
            let reconciler = commands::build_reconciler(&config, args.simulate)?;
            let mut sync = commands::manifest_sync(&config, loader, args.write);
            let summary = commands::apply(&reconciler, &mut sync, args.output).await?;
            log::info!(
                "Applied {} resource(s): {} failed pass(es), {} failed unit(s)",
                summary.resources,
                summary.failed_passes,
                summary.failed_units
            );
            if summary.failed_passes > 0 {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Watch(args) => {
            let loader = match manifest_loader(&args.manifests, &config) {
                Ok(loader) => loader,
                Err(message) => {
                    eprintln!("{}", message);
                    return Ok(ExitCode::FAILURE);
                }
            };
            let reconciler = commands::build_reconciler(&config, args.simulate)?;
            let sync = commands::manifest_sync(&config, loader, args.write);
            commands::watch(&reconciler, sync, config.watch_debounce(), args.output).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AgentConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.log, cli.verbose);

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

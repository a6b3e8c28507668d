//! hostprep CLI.
//!
//! Prepares a development machine (Linux subsystem, container runtime,
//! remote management) and survives the restarts that requires.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hostprep::commands::plan::PlanCommand;
use hostprep::commands::probe::ProbeCommand;
use hostprep::commands::reset::ResetCommand;
use hostprep::commands::run::RunCommand;
use hostprep::commands::status::StatusCommand;
use hostprep::{ui, ProvisionError};

/// Resumable development host provisioning.
#[derive(Parser)]
#[command(
    name = "hostprep",
    version,
    about = "Resumable development host provisioning",
    long_about = "Prepare a development machine: Linux subsystem, container runtime\n\
                  and remote management.\n\n\
                  Progress is checkpointed, so the machine can restart as often as\n\
                  needed. Re-running the command resumes where it left off."
)]
#[command(propagate_version = true, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML).
    #[arg(short, long, global = true, value_name = "FILE", env = "HOSTPREP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Arguments of the default `run` command.
    #[command(flatten)]
    run: RunCommand,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision this machine (default).
    Run(RunCommand),

    /// Show provisioning progress.
    Status(StatusCommand),

    /// Report whether a restart is pending, signal by signal.
    Probe(ProbeCommand),

    /// Forget provisioning progress.
    Reset(ResetCommand),

    /// Show the steps that would run.
    Plan(PlanCommand),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,hostprep=debug")
        } else {
            EnvFilter::new("warn,hostprep=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command.unwrap_or(Commands::Run(cli.run)) {
        Commands::Run(cmd) => cmd.run(config).await,
        Commands::Status(cmd) => cmd.run(config),
        Commands::Probe(cmd) => cmd.run(config),
        Commands::Reset(cmd) => cmd.run(config),
        Commands::Plan(cmd) => cmd.run(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::print_error(&format!("{e:#}"));
            let code = e
                .downcast_ref::<ProvisionError>()
                .map_or(3, ProvisionError::exit_code);
            ExitCode::from(code)
        }
    }
}

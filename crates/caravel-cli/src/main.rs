mod client;
mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use client::ApiClient;
use commands::EXIT_FAILURE;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "caravel",
    version,
    about = "Release workloads from git-declared manifests"
)]
pub struct Cli {
    /// Base URL of the control plane.
    #[arg(long, env = "CARAVEL_URL", default_value = "http://127.0.0.1:3030")]
    url: String,

    /// Instance (tenant) to operate on.
    #[arg(long, env = "CARAVEL_INSTANCE")]
    instance: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the workloads the instance manages.
    Services,
    /// Show candidate images for a workload.
    Images {
        /// Workload spec (e.g. `deployment/helloworld`), or `<all>`.
        service: String,
    },
    /// Release images to workloads, or plan such a release.
    Release(commands::release::ReleaseArgs),
    /// Lock a workload against releases.
    Lock {
        /// Workload to lock (e.g. `deployment/helloworld`).
        controller: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(short, long, default_value = "")]
        message: String,
    },
    /// Remove a workload's lock.
    Unlock {
        /// Workload to unlock.
        controller: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(short, long, default_value = "")]
        message: String,
    },
    /// Show a job's status and result.
    Job {
        /// Job ID as returned by `release`.
        id: String,
    },
    /// Show daemon connectivity and repository head.
    Status,
    /// Ask the daemon to reconcile now.
    Sync,
    /// Dump the live cluster config.
    Export {
        /// Write to a file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let client = ApiClient::new(cli.url.clone(), cli.instance.clone());
    let result = match &cli.command {
        Commands::Services => commands::services::run(&client, cli.json),
        Commands::Images { service } => commands::images::run(&client, service, cli.json),
        Commands::Release(args) => commands::release::run(&client, args, cli.json),
        Commands::Lock {
            controller,
            user,
            message,
        } => commands::policy::run(&client, controller, true, user, message),
        Commands::Unlock {
            controller,
            user,
            message,
        } => commands::policy::run(&client, controller, false, user, message),
        Commands::Job { id } => commands::job::run(&client, id, cli.json),
        Commands::Status => commands::status::run(&client, cli.json),
        Commands::Sync => commands::sync::run(&client),
        Commands::Export { output } => commands::export::run(&client, output.as_deref()),
        Commands::Completions { shell } => commands::completions::run(*shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

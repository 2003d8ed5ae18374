use caravel_server::ApiServer;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "caravel-server", about = "Caravel continuous-delivery control plane")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 3030)]
    port: u16,

    /// Directory for the instance database and repository checkouts.
    #[arg(long, default_value = "./caravel-data")]
    data_dir: PathBuf,

    /// Number of request worker threads.
    #[arg(long, default_value_t = 4)]
    workers: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir).expect("failed to create data directory");

    let _ = ctrlc::set_handler(|| {
        info!("shutting down");
        std::process::exit(0);
    });

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting caravel-server on {addr}");
    info!("data directory: {}", cli.data_dir.display());

    let server = Arc::new(ApiServer::new(cli.data_dir).expect("failed to open server state"));
    caravel_server::run_server(server, &addr, cli.workers.max(1));
}

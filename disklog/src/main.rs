#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::Parser;
use disklog::cli::Args;
use disklog::{Config, DiskLogServer, shutdown};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_tracing();

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    target: "disklog",
                    error = %e,
                    path = %path.display(),
                    "Failed to load config file"
                );
                std::process::exit(1);
            },
        },
        None => Config::from_args(&args),
    };

    info!(
        target: "disklog",
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_address(),
        data_dir = %config.data_dir.display(),
        "Starting DiskLog"
    );

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!(
            target: "disklog",
            error = %e,
            "Failed to create data directory"
        );
        std::process::exit(1);
    }

    let server = DiskLogServer::new(&config.data_dir);
    if let Err(e) = server.start_server(&config.endpoint, config.port) {
        error!(target: "disklog", error = %e, "Failed to start server");
        std::process::exit(1);
    }

    if let Err(e) = shutdown::wait_for_signal().await {
        warn!(
            target: "disklog",
            error = %e,
            "Failed to install signal handlers, shutting down"
        );
    }

    if let Err(e) = server.stop_server() {
        error!(target: "disklog", error = %e, "Failed to stop server");
        std::process::exit(1);
    }
    server.wait_for_termination().await;

    info!(target: "disklog", "DiskLog shutdown complete");
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,disklog=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

//! formdrop - streaming multipart upload service
//!
//! Accepts `multipart/form-data` uploads and streams the file straight into
//! an S3-compatible bucket.

use clap::Parser;
use formdrop::{config::Config, metrics::server::MetricsServer, server::UploadServer};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// formdrop - multipart/form-data uploads into an object store
#[derive(Parser, Debug)]
#[command(name = "formdrop")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Store settings may live in a .env file next to the binary.
    match dotenvy::dotenv() {
        Ok(path) => info!(path = ?path, "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load environment file"),
    }

    info!("Starting formdrop v{}", formdrop::VERSION);

    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(format!("0.0.0.0:{}", config.metrics.port));
        server.start().await?;
        Some(server)
    } else {
        None
    };

    let server = UploadServer::new(config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }

    Ok(())
}

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vortex_observer::config::RuntimeConfig;
use vortex_observer::{Config, VortexServer, http};

/// Clinical second-opinion observer backed by a local model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config (overrides VORTEX_CONFIG)
    #[arg(long)]
    config: Option<String>,

    /// HTTP bind address (overrides VORTEX_HTTP_BIND)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG may come from the env file, so export it before building the filter
    Config::load_env_file();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(RuntimeConfig::load_from_env().log_level))
        .init();

    let mut config = Config::load_from(args.config.as_deref()).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    if let Some(bind) = args.bind {
        config.runtime.http_bind = bind;
    }

    info!(
        model = %config.generation.model,
        endpoint = %config.generation.endpoint,
        "Starting vortex-observer"
    );

    let server = VortexServer::new(config)?;
    let shutdown = CancellationToken::new();
    let background = server.start_background(shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        signal.cancel();
    });

    let served = http::start_http_server(server, shutdown.clone()).await;
    shutdown.cancel();
    // Warm-up may still be waiting on the model; do not hold shutdown for it
    for handle in background {
        handle.abort();
        let _ = handle.await;
    }
    served?;
    Ok(())
}

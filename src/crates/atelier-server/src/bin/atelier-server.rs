//! Atelier server binary.
//!
//! Starts the local code-generation service: loads the TOML configuration,
//! initializes the process-wide services, and serves the HTTP API until
//! interrupted.

use atelier_server::{create_router, AppServices, Config};
use std::net::SocketAddr;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("atelier.toml"));
    let config = Config::load(&config_path)?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    if config.logging.enable_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.log_file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(move || file.try_clone().expect("log file handle"))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(config = %config_path.display(), "starting atelier");
    tracing::info!(
        model = %config.default.default_model,
        llm = %config.llm.base_url,
        checkpoints = %config.persistence.checkpoint_directory,
        "configuration loaded"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let services = AppServices::initialize(config).await?;
    let router = create_router(services.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    services.shutdown();
    Ok(())
}

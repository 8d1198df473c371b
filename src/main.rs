use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use vkg_query_backend::api::routes::create_router;
use vkg_query_backend::config::Config;
use vkg_query_backend::services::{mask_credentials, ServiceContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.style.as_str() {
        "compact" => subscriber.compact().init(),
        "pretty" => subscriber.pretty().init(),
        _ => subscriber.init(),
    }

    info!("Starting server on {}", config.server_address());
    info!("Federation engine at {}", mask_credentials(&config.engine.url));

    let addr: SocketAddr = config.server_address().parse()?;

    let context = Arc::new(ServiceContext::new(config).await.map_err(|e| {
        error!("Failed to initialize services: {}", e);
        e
    })?);

    let app = create_router(context.clone());

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    context.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

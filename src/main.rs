use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use tablewise_backend::api::routes::create_router;
use tablewise_backend::config::Config;
use tablewise_backend::services::{
    ConnectionManager, DriverConnectorFactory, PassthroughCipher, QueryRunner, RunnerSettings,
};
use tablewise_backend::storage::SqliteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so the log level can come from it
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting server on {}", config.server_address());

    // Datasource and inspection store
    let storage = Arc::new(
        SqliteStorage::new(&config.database.url)
            .await
            .with_context(|| format!("Failed to initialize database at {}", config.database.url))?,
    );

    let factory = DriverConnectorFactory::new(config.runner.connector_settings());
    let runner = QueryRunner::new(
        storage,
        ConnectionManager::new(Arc::new(factory)),
        Arc::new(PassthroughCipher),
        RunnerSettings::from(&config.runner),
    );

    let app = create_router(runner);

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .with_context(|| format!("Invalid server address {}", config.server_address()))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

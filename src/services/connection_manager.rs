use futures::future::join_all;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{Dialect, DynamicConnectionConfig};
use crate::services::database::{Connector, ConnectorSettings, MySqlConnector, PostgresConnector};

/// Opens live connectors for a dialect
#[async_trait::async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(
        &self,
        dialect: Dialect,
        config: &DynamicConnectionConfig,
    ) -> Result<Box<dyn Connector>, AppError>;
}

/// Factory backed by the real MySQL and PostgreSQL drivers
#[derive(Debug, Clone, Default)]
pub struct DriverConnectorFactory {
    settings: ConnectorSettings,
}

impl DriverConnectorFactory {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl ConnectorFactory for DriverConnectorFactory {
    async fn connect(
        &self,
        dialect: Dialect,
        config: &DynamicConnectionConfig,
    ) -> Result<Box<dyn Connector>, AppError> {
        match dialect {
            Dialect::MySql => Ok(Box::new(MySqlConnector::connect(config, &self.settings).await?)),
            Dialect::Postgres => Ok(Box::new(PostgresConnector::connect(config, &self.settings).await?)),
        }
    }
}

/// Hands out connectors. Nothing is pooled: every connector belongs either to
/// its caller (`connect`) or to a `ConnectionScope` that closes it.
#[derive(Clone)]
pub struct ConnectionManager {
    factory: Arc<dyn ConnectorFactory>,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn ConnectorFactory>) -> Self {
        Self { factory }
    }

    /// Open a connector owned by the caller, who must close it
    pub async fn connect(
        &self,
        dialect: Dialect,
        config: &DynamicConnectionConfig,
    ) -> Result<Box<dyn Connector>, AppError> {
        tracing::debug!(
            "Opening unscoped {} connection to {}",
            dialect,
            Self::mask_credentials(&config.url)
        );
        self.factory.connect(dialect, config).await
    }

    /// Start a unit of work
    pub fn scope(&self) -> ConnectionScope {
        ConnectionScope {
            factory: self.factory.clone(),
            connectors: Vec::new(),
        }
    }

    /// Mask credentials in a URL-shaped host for safe logging
    pub fn mask_credentials(url: &str) -> String {
        if !url.contains("://") {
            return url.to_string();
        }
        match url::Url::parse(url) {
            Ok(parsed) => {
                let mut masked = parsed.clone();
                if parsed.password().is_some() {
                    let _ = masked.set_password(Some("***"));
                }
                masked.to_string()
            }
            Err(_) => "[invalid-url]".to_string(),
        }
    }
}

/// Connectors opened during one unit of work. `close_all` closes them; a scope
/// dropped early (error or cancellation) closes the rest on a spawned task.
pub struct ConnectionScope {
    factory: Arc<dyn ConnectorFactory>,
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectionScope {
    pub async fn acquire(
        &mut self,
        dialect: Dialect,
        config: &DynamicConnectionConfig,
    ) -> Result<&mut dyn Connector, AppError> {
        tracing::debug!(
            "Opening {} connection to {}",
            dialect,
            ConnectionManager::mask_credentials(&config.url)
        );
        let connector = self.factory.connect(dialect, config).await?;
        let index = self.connectors.len();
        self.connectors.push(connector);
        Ok(self.connectors[index].as_mut())
    }

    pub fn open_count(&self) -> usize {
        self.connectors.iter().filter(|c| !c.is_closed()).count()
    }

    pub async fn close_all(&mut self) {
        let closes = self
            .connectors
            .iter_mut()
            .filter(|c| !c.is_closed())
            .map(|c| c.close());
        for result in join_all(closes).await {
            if let Err(e) = result {
                tracing::warn!("Failed to close connection: {}", e);
            }
        }
        self.connectors.clear();
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        let open: Vec<Box<dyn Connector>> = self.connectors.drain(..).filter(|c| !c.is_closed()).collect();
        if open.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Closing {} connections left open by an aborted unit of work", open.len());
                handle.spawn(async move {
                    for mut connector in open {
                        if let Err(e) = connector.close().await {
                            tracing::warn!("Failed to close connection: {}", e);
                        }
                    }
                });
            }
            Err(_) => tracing::warn!("Dropping {} open connections outside a runtime", open.len()),
        }
    }
}

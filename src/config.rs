use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::database::ConnectorSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub runner: RunnerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    pub default_page_size: usize,
    pub query_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Rewrite loopback datasource hosts to `host.docker.internal`
    pub docker_mode: bool,
}

impl RunnerConfig {
    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            query_timeout_secs: 10,
            connect_timeout_secs: 10,
            docker_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./tablewise.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("runner.default_page_size", 20)?
            .set_default("runner.query_timeout_secs", 10)?
            .set_default("runner.connect_timeout_secs", 10)?
            .set_default("runner.docker_mode", false)?
            .set_default("logging.level", "info")?;

        // Load from environment variables
        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(timeout) = env::var("QUERY_TIMEOUT_SECS") {
            builder = builder.set_override("runner.query_timeout_secs", timeout.parse::<u64>().unwrap_or(10))?;
        }

        if let Ok(timeout) = env::var("CONNECT_TIMEOUT_SECS") {
            builder = builder.set_override("runner.connect_timeout_secs", timeout.parse::<u64>().unwrap_or(10))?;
        }

        if let Ok(docker) = env::var("DOCKER_MODE") {
            let enabled = matches!(docker.to_lowercase().as_str(), "1" | "true" | "yes");
            builder = builder.set_override("runner.docker_mode", enabled)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

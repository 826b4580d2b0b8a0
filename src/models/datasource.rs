use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::api::middleware::AppError;

/// SQL family of a datasource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }
}

impl FromStr for Dialect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            _ => Err(AppError::Validation(format!("Unsupported database type: {}", s))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasourceStatus {
    Ready,
    Inspecting,
    Failed,
}

impl DatasourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceStatus::Ready => "READY",
            DatasourceStatus::Inspecting => "INSPECTING",
            DatasourceStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "INSPECTING" => DatasourceStatus::Inspecting,
            "FAILED" => DatasourceStatus::Failed,
            _ => DatasourceStatus::Ready,
        }
    }
}

/// A registered external database. The password is stored encrypted and is only
/// turned into plaintext through a `CredentialCipher` right before connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    pub name: String,
    pub dialect: Dialect,
    pub url: String,
    pub port: Option<u16>,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    pub schema: Option<String>,
    pub allow_insert: bool,
    pub allow_update: bool,
    pub status: DatasourceStatus,
    pub created_at: DateTime<Utc>,
    pub last_inspected: Option<DateTime<Utc>>,
}

impl Datasource {
    pub fn new(name: String, dialect: Dialect, url: String, user: String, database: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            dialect,
            url,
            port: None,
            user,
            password: None,
            database,
            schema: None,
            allow_insert: false,
            allow_update: false,
            status: DatasourceStatus::Ready,
            created_at: Utc::now(),
            last_inspected: None,
        }
    }

    /// Build the connection settings, substituting the already decrypted password
    pub fn connection_config(&self, password: Option<String>) -> DynamicConnectionConfig {
        DynamicConnectionConfig {
            url: self.url.clone(),
            port: self.port,
            user: self.user.clone(),
            password,
            database: self.database.clone(),
            schema: self.schema.clone(),
        }
    }
}

/// Body of a datasource registration; the password arrives in plaintext
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDatasourceRequest {
    pub name: String,
    pub dialect: Dialect,
    pub url: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub allow_insert: bool,
    #[serde(default)]
    pub allow_update: bool,
}

impl CreateDatasourceRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Datasource name cannot be empty".to_string()));
        }
        if self.url.trim().is_empty() {
            return Err(AppError::Validation("Datasource host cannot be empty".to_string()));
        }
        if self.url.contains("://") {
            url::Url::parse(&self.url)
                .map_err(|e| AppError::Validation(format!("Invalid datasource URL: {}", e)))?;
        }
        if self.database.trim().is_empty() {
            return Err(AppError::Validation("Database name cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn into_datasource(self) -> Datasource {
        let mut datasource = Datasource::new(self.name, self.dialect, self.url, self.user, self.database);
        datasource.port = self.port;
        datasource.password = self.password;
        datasource.schema = self.schema;
        datasource.allow_insert = self.allow_insert;
        datasource.allow_update = self.allow_update;
        datasource
    }
}

/// Settings for opening one live connection to a datasource
#[derive(Clone, Deserialize)]
pub struct DynamicConnectionConfig {
    pub url: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub schema: Option<String>,
}

impl DynamicConnectionConfig {
    /// Host name to connect to. Accepts a bare host or a URL such as
    /// `postgres://db.internal:5432`, in which case the host part is used.
    pub fn host(&self) -> String {
        if self.url.contains("://") {
            if let Ok(parsed) = url::Url::parse(&self.url) {
                if let Some(host) = parsed.host_str() {
                    return host.to_string();
                }
            }
        }
        self.url.clone()
    }

    /// Explicit port, or the one embedded in a URL-shaped `url`
    pub fn port(&self) -> Option<u16> {
        self.port.or_else(|| {
            if self.url.contains("://") {
                url::Url::parse(&self.url).ok().and_then(|u| u.port())
            } else {
                None
            }
        })
    }

    /// Postgres schema, `public` when not configured
    pub fn schema_or_default(&self) -> &str {
        self.schema
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("public")
    }

    /// Rewrite loopback hosts for a server running inside a container
    pub fn with_docker_host(mut self) -> Self {
        let host = self.host();
        if host == "localhost" || host == "127.0.0.1" {
            self.url = self.url.replacen(&host, "host.docker.internal", 1);
        }
        self
    }
}

impl fmt::Debug for DynamicConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicConnectionConfig")
            .field("url", &self.url)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

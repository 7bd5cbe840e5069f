//! Saved connection profiles and backend selection.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::driver::{Driver, DriverError};
use super::mysql::MySqlDriver;
use super::postgres::PostgresDriver;
use crate::config::EngineConfig;
use crate::sql::dialect::Dialect;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    MySql,
    Postgres,
}

impl Backend {
    pub fn dialect(self) -> Dialect {
        match self {
            Backend::MySql => Dialect::MySql,
            Backend::Postgres => Dialect::Postgres,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Backend::MySql => 3306,
            Backend::Postgres => 5432,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    #[serde(default)]
    pub backend: Backend,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// PostgreSQL search_path schema. Ignored by MySQL.
    #[serde(default)]
    pub schema: Option<String>,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl ConnectionConfig {
    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("Local MySQL"),
            backend: Backend::MySql,
            host: String::from("localhost"),
            port: 3306,
            database: String::new(),
            schema: None,
            username: String::from("root"),
            password: String::new(),
        }
    }
}

/// Open a connection for the profile's backend.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Driver>, DriverError> {
    match config.backend {
        Backend::MySql => Ok(Box::new(MySqlDriver::connect(config).await?)),
        Backend::Postgres => Ok(Box::new(PostgresDriver::connect(config).await?)),
    }
}

/// The on-disk profile file: saved connections plus engine tunables.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Profiles {
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Profiles {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rowsql")
            .join("connections.toml")
    }

    pub fn load() -> Result<Profiles> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Profiles::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let profiles = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(profiles)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections
            .iter()
            .find(|profile| profile.name.eq_ignore_ascii_case(name))
    }
}

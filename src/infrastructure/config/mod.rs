use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::domain::error::{AppError, Result};

const ENV_PREFIX: &str = "TABLE_EXCHANGE_";
const ENV_CONFIG_PATH: &str = "TABLE_EXCHANGE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "table_exchange.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub import: ImportConfig,
    pub auth: AuthConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Uploads above this size are rejected before any decoding happens.
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token -> principal id.
    pub tokens: HashMap<String, String>,
    pub allow_anonymous: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
            database: DatabaseConfig {
                path: PathBuf::from("table_exchange.db"),
                max_connections: 4,
            },
            import: ImportConfig {
                max_upload_bytes: 16 * 1024 * 1024,
            },
            auth: AuthConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file (`TABLE_EXCHANGE_CONFIG` or
    /// `table_exchange.toml`), then `TABLE_EXCHANGE_*` environment variables.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.import.max_upload_bytes == 0 {
            return Err(AppError::ConfigError(
                "import.max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

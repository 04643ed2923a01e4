//! Configuration loading from wikistats.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

/// Upstream event stream.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,

    /// Sent on every request; the upstream rejects anonymous clients.
    pub user_agent: String,

    /// Seconds to wait before reconnecting after the server ends the stream.
    pub reconnect_delay_secs: u64,
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "https://stream.wikimedia.org/v2/stream/recentchange".to_string(),
            user_agent: concat!("wikistats/", env!("CARGO_PKG_VERSION")).to_string(),
            reconnect_delay_secs: stream::DEFAULT_RECONNECT_DELAY.as_secs(),
        }
    }
}

/// HTTP API listener.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7000,
        }
    }
}

/// Which aggregate store to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local sets. Counts are lost on exit.
    #[default]
    Memory,
    /// Replicated store over a SQLite key space.
    #[serde(alias = "replicated")]
    Sqlite,
}

impl Backend {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" | "replicated" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Aggregate store selection.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,

    /// Database file for the sqlite backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: PathBuf::from("wikistats.db"),
        }
    }
}

/// Bootstrap account seeded at startup.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,

    /// bcrypt work factor for the seeded password.
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
            bcrypt_cost: storage::DEFAULT_COST,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `STREAM_URL`, `API_PORT`, `DATABASE_TYPE` and `DATABASE_PATH`.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`; unset or empty values
    /// leave the file setting in place.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.is_empty());

        if let Some(url) = get("STREAM_URL") {
            self.stream.url = url;
        }
        if let Some(port) = get("API_PORT") {
            self.api.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidOverride {
                    var: "API_PORT",
                    value: port,
                })?;
        }
        if let Some(backend) = get("DATABASE_TYPE") {
            self.storage.backend =
                Backend::parse(&backend).ok_or(ConfigError::InvalidOverride {
                    var: "DATABASE_TYPE",
                    value: backend,
                })?;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {var}: {value:?}")]
    InvalidOverride { var: &'static str, value: String },
}

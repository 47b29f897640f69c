use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::mysql::MySqlConnectOptions;

use crate::shared::ValidationError;

/// Configuration for connecting to a MySQL-compatible server.
///
/// Deliberately not [`serde::Serialize`] so the password can never leak into serialized output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MySqlConnectionConfig {
    /// Hostname or IP address of the server.
    pub host: String,
    /// Port the server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Schema (database) the batch operates on.
    pub name: String,
    /// User to authenticate as.
    pub username: String,
    /// Password for [`MySqlConnectionConfig::username`]. Redacted in debug output.
    pub password: Option<SecretString>,
    /// Connections kept open by the pool even when idle.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Upper bound on pooled connections. Should cover consumers plus producers.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Time allowed for acquiring a connection before the run fails.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl MySqlConnectionConfig {
    pub const DEFAULT_PORT: u16 = 3306;

    pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 64;

    pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

    /// Validates pool sizing and required identity fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingField("connection.host".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ValidationError::invalid(
                "connection.max_connections",
                "must be greater than 0",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ValidationError::invalid(
                "connection.min_connections",
                "must not exceed `max_connections`",
            ));
        }

        Ok(())
    }

    /// Returns how long a pool may wait for a free connection.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Converts connection settings into driver-specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options that connect to the server without selecting a schema.
    fn without_db(&self) -> Output;

    /// Options that connect and select the configured schema.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<MySqlConnectOptions> for MySqlConnectionConfig {
    fn without_db(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .charset("utf8mb4");

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> MySqlConnectOptions {
        self.without_db().database(&self.name)
    }
}

fn default_port() -> u16 {
    MySqlConnectionConfig::DEFAULT_PORT
}

fn default_min_connections() -> u32 {
    MySqlConnectionConfig::DEFAULT_MIN_CONNECTIONS
}

fn default_max_connections() -> u32 {
    MySqlConnectionConfig::DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_ms() -> u64 {
    MySqlConnectionConfig::DEFAULT_ACQUIRE_TIMEOUT_MS
}

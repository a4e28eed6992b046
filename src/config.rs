//! Environment-driven configuration.
//!
//! Every setting is read from an environment variable (after loading a `.env`
//! file when one is present). Only `DATABASE_URL` is required.
//!
//! | Variable                          | Default | Meaning                                  |
//! |-----------------------------------|---------|------------------------------------------|
//! | `DATABASE_URL`                    | -       | SeaORM connection string                 |
//! | `CHAT_STORE_MAX_CONNECTIONS`      | 10      | Pool upper bound                         |
//! | `CHAT_STORE_MIN_CONNECTIONS`      | 1       | Pool lower bound                         |
//! | `CHAT_STORE_CONNECT_TIMEOUT_SECS` | 10      | Connect and acquire timeout              |
//! | `CHAT_STORE_CACHE_TTL_SECS`       | 300     | TTL of cached sessions and preferences   |
//! | `CHAT_STORE_MAX_UPLOAD_MB`        | 10      | Largest accepted document upload         |
//! | `API_KEY_ENCRYPTION_KEY`          | unset   | Base64 32-byte key for user API keys     |

use std::env;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::crypto::ApiKeyCipher;

/// Failure to assemble a [`StoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),

    #[error("environment variable {var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Settings needed to open the database and build a [`MetadataStore`](crate::MetadataStore).
#[derive(Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub cache_ttl: time::Duration,
    pub max_upload_bytes: u64,
    /// Decoded `API_KEY_ENCRYPTION_KEY`. `None` makes every credential
    /// operation fail closed.
    pub api_key_encryption_key: Option<[u8; 32]>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout", &self.connect_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field(
                "api_key_encryption_key",
                &self.api_key_encryption_key.map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl StoreConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_CACHE_TTL_SECS: i64 = 300;
    pub const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "failed to load .env file");
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections = parse_or(
            &lookup,
            "CHAT_STORE_MAX_CONNECTIONS",
            Self::DEFAULT_MAX_CONNECTIONS,
        )?;
        let min_connections = parse_or(
            &lookup,
            "CHAT_STORE_MIN_CONNECTIONS",
            Self::DEFAULT_MIN_CONNECTIONS,
        )?;
        if min_connections > max_connections {
            return Err(ConfigError::Invalid {
                var: "CHAT_STORE_MIN_CONNECTIONS",
                reason: format!("{min_connections} exceeds max connections {max_connections}"),
            });
        }

        let connect_timeout_secs: u64 = parse_or(
            &lookup,
            "CHAT_STORE_CONNECT_TIMEOUT_SECS",
            Self::DEFAULT_CONNECT_TIMEOUT_SECS,
        )?;
        let cache_ttl_secs: i64 = parse_or(
            &lookup,
            "CHAT_STORE_CACHE_TTL_SECS",
            Self::DEFAULT_CACHE_TTL_SECS,
        )?;
        if cache_ttl_secs < 0 {
            return Err(ConfigError::Invalid {
                var: "CHAT_STORE_CACHE_TTL_SECS",
                reason: "must not be negative".to_string(),
            });
        }
        let max_upload_mb: u64 =
            parse_or(&lookup, "CHAT_STORE_MAX_UPLOAD_MB", Self::DEFAULT_MAX_UPLOAD_MB)?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .ok_or(ConfigError::Invalid {
                var: "CHAT_STORE_MAX_UPLOAD_MB",
                reason: format!("{max_upload_mb} MB is out of range"),
            })?;

        let api_key_encryption_key = match lookup("API_KEY_ENCRYPTION_KEY") {
            Some(encoded) if !encoded.trim().is_empty() => {
                let key = ApiKeyCipher::decode_key(encoded.trim()).map_err(|e| {
                    ConfigError::Invalid {
                        var: "API_KEY_ENCRYPTION_KEY",
                        reason: e.to_string(),
                    }
                })?;
                Some(key)
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            max_connections,
            min_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            cache_ttl: time::Duration::seconds(cache_ttl_secs),
            max_upload_bytes,
            api_key_encryption_key,
        })
    }

    /// SeaORM pool options derived from this configuration.
    pub fn connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(self.database_url.clone());
        opt.max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.connect_timeout)
            .sqlx_logging(false);
        opt
    }

    /// Opens the connection pool.
    pub async fn connect(&self) -> Result<DatabaseConnection, DbErr> {
        info!(
            max_connections = self.max_connections,
            "connecting to metadata database"
        );
        Database::connect(self.connect_options()).await
    }

    /// The credential cipher, when a key is configured.
    pub fn cipher(&self) -> Option<ApiKeyCipher> {
        self.api_key_encryption_key.map(ApiKeyCipher::new)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

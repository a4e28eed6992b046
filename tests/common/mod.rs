//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::sync::Once;

use anyhow::Result;
use chat_metadata_store::migration::{Migrator, MigratorTrait};
use chat_metadata_store::{ApiKeyCipher, MetadataStore};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tempfile::TempDir;
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

/// Quiet logging unless `TEST_LOG` asks for more.
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .init();
    });
}

/// Fresh in-memory SQLite database with the schema applied.
///
/// One pooled connection: every pooled connection to `sqlite::memory:` would
/// otherwise get its own empty database.
pub async fn test_connection() -> Result<DatabaseConnection> {
    init_test_logging();
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let conn = Database::connect(options).await?;
    Migrator::up(&conn, None).await?;
    Ok(conn)
}

/// Store with a random credential key and the default in-memory cache.
pub async fn test_store() -> Result<MetadataStore> {
    let conn = test_connection().await?;
    let cipher = ApiKeyCipher::from_base64(&ApiKeyCipher::generate_key())?;
    Ok(MetadataStore::new(conn).with_cipher(cipher))
}

/// Creates a user with a unique email and returns its id.
pub async fn create_test_user(store: &MetadataStore) -> Result<Uuid> {
    let email = format!("user-{}@example.com", Uuid::new_v4().simple());
    Ok(store.create_user(&email, Some("Test User")).await?.id)
}

/// Store on a SQLite file with a pool of `connections`, for tests where
/// requests must really run side by side. Keep the `TempDir` alive for as
/// long as the store is used.
pub async fn file_backed_store(connections: u32) -> Result<(MetadataStore, TempDir)> {
    init_test_logging();
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(connections)
        .min_connections(connections)
        .sqlx_logging(false);
    let conn = Database::connect(options).await?;
    Migrator::up(&conn, None).await?;
    Ok((MetadataStore::new(conn), dir))
}

//! Usage walkthrough for chat-metadata-store
//!
//! Runs the main flows against an in-memory SQLite database, so no server is
//! needed:
//!
//! ```bash
//! cargo run --example usage_walkthrough
//! ```

use std::sync::Arc;

use chat_metadata_store::entity::available_tool::ToolCategory;
use chat_metadata_store::entity::message_feedback::Rating;
use chat_metadata_store::migration::{Migrator, MigratorTrait};
use chat_metadata_store::types::ToolConfiguration;
use chat_metadata_store::{
    ApiKeyCipher, MemoryCache, MetadataStore, NewCatalogTool, NewFeedback, NewSession, NewUsage,
    PreferencesUpdate, StoreError,
};
use sea_orm::{ConnectOptions, Database};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let conn = Database::connect(opt).await?;
    Migrator::up(&conn, None).await?;

    let store = MetadataStore::new(conn)
        .with_cache(Arc::new(MemoryCache::new()))
        .with_cipher(ApiKeyCipher::from_base64(&ApiKeyCipher::generate_key())?);

    let user = store.create_user("ada@example.com", Some("Ada")).await?;
    store
        .update_preferences(
            user.id,
            PreferencesUpdate {
                default_model: Some("gpt-4o".to_string()),
                daily_token_limit: Some(1_000),
                ..Default::default()
            },
        )
        .await?;

    let session = store
        .create_session(
            user.id,
            NewSession {
                title: Some("Walkthrough".to_string()),
                ..Default::default()
            },
        )
        .await?;
    info!(session = %session.id, thread = %session.thread_id(), model = %session.model_name, "session created");

    // 4 x 225 tokens fit in the 1000 token day, the fifth does not
    for turn in 1..=5 {
        let usage = NewUsage::chat("gpt-4o", 150, 75).in_session(session.id);
        match store.record_usage_within_quota(user.id, usage).await {
            Ok(row) => info!(turn, cost = %row.total_cost, "turn recorded"),
            Err(StoreError::LimitExceeded(reason)) => info!(turn, %reason, "turn refused"),
            Err(e) => return Err(e.into()),
        }
    }

    let stats = store.session_stats(user.id, session.id).await?;
    info!(messages = stats.message_count, tokens = stats.total_tokens, cost = %stats.total_cost, "session stats");

    let mut search = NewCatalogTool::new("web_search", "Web search", ToolCategory::Search);
    search.default_rate_limit = Some(2);
    store.register_tool(search).await?;
    store
        .enable_tool(user.id, "web_search", ToolConfiguration::default())
        .await?;
    for _ in 0..3 {
        match store.use_tool(user.id, "web_search").await {
            Ok(used) => info!(remaining = ?used.remaining, "web_search used"),
            Err(StoreError::LimitExceeded(reason)) => info!(%reason, "web_search refused"),
            Err(e) => return Err(e.into()),
        }
    }

    store
        .submit_feedback(
            user.id,
            NewFeedback::new(session.id, "checkpoint-1", 1, Rating::ThumbsUp),
        )
        .await?;
    let satisfaction = store.user_satisfaction(user.id).await?;
    info!(rate = satisfaction.satisfaction_rate, "user satisfaction");

    let thread_id = store.hard_delete_session(user.id, session.id).await?;
    info!(%thread_id, "session deleted; purge the thread from the checkpointer");

    Ok(())
}

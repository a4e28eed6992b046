//! # Chat Metadata Store for Sea-ORM
//!
//! Persistence layer for the metadata side of a conversational-AI backend,
//! built on [Sea-ORM](https://crates.io/crates/sea-orm).
//!
//! Message bodies live in an external checkpointer and document chunks in an
//! external vector store. This crate keeps everything around them: who owns
//! which conversation, what each request cost, whether the next one is within
//! quota, which tools a user may call and how often, and which provider
//! credentials to use.
//!
//! ## Features
//!
//! - Chat sessions with analytics counters, pinning, archiving and thread ids
//! - Per-user preferences with lazily created defaults
//! - Token usage accounting with exact decimal costs from a model price table
//! - Daily and monthly quotas, with an atomic check-and-record variant
//! - Per-tool rate limits over trailing windows
//! - Message feedback and satisfaction statistics
//! - Document processing state and vector-store metadata
//! - Prompt templates with `{variable}` rendering
//! - AES-256-GCM encrypted provider API keys
//! - An injected read-through cache ([`MemoryCache`] or [`DatabaseCache`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use chat_metadata_store::migration::{Migrator, MigratorTrait};
//! use chat_metadata_store::{MetadataStore, NewSession, NewUsage, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::from_env()?;
//! let store = MetadataStore::from_config(&config).await?;
//! Migrator::up(store.connection(), None).await?;
//!
//! let user = store.create_user("ada@example.com", Some("Ada")).await?;
//! let session = store.create_session(user.id, NewSession::default()).await?;
//!
//! // Refuses the request if it would exceed the user's quota
//! let usage = NewUsage::chat("gpt-4o", 150, 75).in_session(session.id);
//! store.record_usage_within_quota(user.id, usage).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advisory checks
//!
//! ```no_run
//! use chat_metadata_store::MetadataStore;
//! use uuid::Uuid;
//!
//! # async fn example(store: MetadataStore, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! let check = store.check_user_limits(user_id, 500).await?;
//! if !check.is_allowed() {
//!     println!("refused: {}", check.reason().unwrap_or_default());
//! }
//!
//! let status = store.check_tool_rate_limit(user_id, "web_search").await?;
//! println!("remaining uses: {:?}", status.remaining);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod crypto;
pub mod entity;
pub mod error;
pub mod limits;
pub mod pricing;
mod store;
pub mod types;

#[cfg(feature = "migration")]
pub mod migration;

pub use cache::{CacheError, CacheStore, DatabaseCache, MemoryCache};
pub use config::{ConfigError, StoreConfig};
pub use crypto::{ApiKeyCipher, CryptoError};
pub use error::{Result, StoreError};
pub use limits::{Decision, LimitExceeded, QuotaCheck, RateLimitStatus, UsageLimits, WindowUsage};
pub use pricing::{CostBreakdown, ModelPrice, PriceTable};

/// The main store type. See [`MetadataStore`] for usage.
pub use store::MetadataStore;

pub use store::{
    session_collection_name, user_collection_name, DailyUsage, FeedbackReview, KeyValidator,
    ModelUsage, NewApiKey, NewCatalogTool, NewDocument, NewFeedback, NewPromptTemplate, NewSession,
    NewUsage, PreferencesUpdate, ProcessingResult, SatisfactionStats, SessionDefaults,
    SessionFilter, SessionStats, SessionUpdate, StorageUsage, ThreadConfig, ToolUse, UsageStats,
    UserStats, SUPPORTED_FILE_TYPES,
};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::{Alias, Func, NullOrdering, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::preferences::{check_positive, check_temperature, load_or_create, SessionDefaults};
use super::{owned_session, MetadataStore};
use crate::cache;
use crate::entity::chat_session::{self, Entity as ChatSessionEntity};
use crate::entity::message_feedback::{self, Entity as MessageFeedbackEntity, Rating};
use crate::entity::token_usage::{self, Entity as TokenUsageEntity};
use crate::entity::user_document::{self, Entity as UserDocumentEntity};
use crate::error::{Result, StoreError};
use crate::types::Tags;

const DEFAULT_TITLE: &str = "New Conversation";
const MAX_TITLE_CHARS: usize = 255;

/// Input of [`MetadataStore::create_session`]. Unset model settings come from
/// the user's preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSession {
    pub title: Option<String>,
    pub description: Option<String>,
    pub model_name: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    pub enable_summarization: Option<bool>,
    pub summarization_threshold: Option<i32>,
    pub custom_system_prompt: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    /// Must be a JSON object when given.
    pub metadata: Option<serde_json::Value>,
}

/// Partial update of a session. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub model_name: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    pub enable_summarization: Option<bool>,
    pub summarization_threshold: Option<i32>,
    pub custom_system_prompt: Option<Option<String>>,
    pub tags: Option<Tags>,
    pub metadata: Option<serde_json::Value>,
}

/// Which of a user's sessions to list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFilter {
    pub include_archived: bool,
    /// Substring of the title.
    pub search: Option<String>,
    pub limit: Option<u64>,
}

/// Addressing and model settings handed to the checkpointer for one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadConfig {
    pub thread_id: String,
    pub user_id: Uuid,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub title: String,
    pub message_count: i32,
    pub total_tokens: i64,
    pub total_cost: Decimal,
    pub avg_response_time_ms: Option<f64>,
    pub feedback_count: u64,
    /// Percentage of ratings that were positive, `None` without feedback.
    pub satisfaction_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: Uuid,
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub archived_sessions: u64,
    pub pinned_sessions: u64,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub total_cost: Decimal,
}

fn check_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(StoreError::validation("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(StoreError::validation("title", "must be at most 255 characters"));
    }
    Ok(())
}

fn check_metadata(metadata: &serde_json::Value) -> Result<()> {
    if !metadata.is_object() {
        return Err(StoreError::validation("metadata", "must be a JSON object"));
    }
    Ok(())
}

/// Adds one turn's totals to a session's counters with a single UPDATE.
pub(crate) async fn increment_session_counters<C>(
    db: &C,
    session_id: Uuid,
    messages: i32,
    tokens: i64,
    cost: Decimal,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let result = ChatSessionEntity::update_many()
        .col_expr(
            chat_session::Column::MessageCount,
            Expr::col(chat_session::Column::MessageCount).add(messages),
        )
        .col_expr(
            chat_session::Column::TotalTokensUsed,
            Expr::col(chat_session::Column::TotalTokensUsed).add(tokens),
        )
        .col_expr(
            chat_session::Column::TotalCost,
            Expr::col(chat_session::Column::TotalCost).add(cost),
        )
        .col_expr(chat_session::Column::LastMessageAt, Expr::value(now))
        .col_expr(chat_session::Column::UpdatedAt, Expr::value(now))
        .filter(chat_session::Column::Id.eq(session_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(StoreError::not_found("chat session", session_id));
    }
    Ok(())
}

impl MetadataStore {
    /// Creates a session for `user_id`, filling unset model settings from the
    /// user's preferences.
    pub async fn create_session(&self, user_id: Uuid, new: NewSession) -> Result<chat_session::Model> {
        let title = new
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        check_title(&title)?;
        if let Some(t) = new.temperature {
            check_temperature(t)?;
        }
        if let Some(v) = new.max_tokens {
            check_positive("max_tokens", v)?;
        }
        if let Some(v) = new.summarization_threshold {
            check_positive("summarization_threshold", v)?;
        }
        let metadata = new.metadata.unwrap_or_else(|| serde_json::json!({}));
        check_metadata(&metadata)?;

        let prefs = load_or_create(&self.conn, user_id).await?;
        let defaults = SessionDefaults::from(&prefs);
        let now = Utc::now();

        let session = chat_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            title: Set(title),
            description: Set(new.description),
            model_name: Set(new.model_name.unwrap_or(defaults.model_name)),
            temperature: Set(new.temperature.unwrap_or(defaults.temperature)),
            max_tokens: Set(new.max_tokens.unwrap_or(defaults.max_tokens)),
            enable_summarization: Set(new.enable_summarization.unwrap_or(defaults.enable_summarization)),
            summarization_threshold: Set(new
                .summarization_threshold
                .unwrap_or(defaults.summarization_threshold)),
            custom_system_prompt: Set(new.custom_system_prompt.or(defaults.custom_system_prompt)),
            is_active: Set(true),
            is_archived: Set(false),
            is_pinned: Set(false),
            tags: Set(new.tags),
            metadata: Set(metadata),
            message_count: Set(0),
            total_tokens_used: Set(0),
            total_cost: Set(Decimal::ZERO),
            last_message_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.conn)
        .await?;

        info!(%user_id, session_id = %session.id, model = %session.model_name, "chat session created");
        Ok(session)
    }

    /// Returns the session if `user_id` owns it. Soft-deleted sessions are
    /// still returned; callers check `is_active`.
    pub async fn get_session(&self, user_id: Uuid, session_id: Uuid) -> Result<chat_session::Model> {
        let key = cache::session_key(session_id);
        if let Some(session) = self.cache_get::<chat_session::Model>(&key).await {
            if session.user_id == user_id {
                return Ok(session);
            }
            return Err(StoreError::not_found("chat session", session_id));
        }

        let session = owned_session(&self.conn, user_id, session_id).await?;
        self.cache_put(&key, &session).await;
        Ok(session)
    }

    /// Active sessions of a user: pinned first, then most recent message,
    /// then most recent update.
    pub async fn list_sessions(&self, user_id: Uuid, filter: SessionFilter) -> Result<Vec<chat_session::Model>> {
        let mut query = ChatSessionEntity::find()
            .filter(chat_session::Column::UserId.eq(user_id))
            .filter(chat_session::Column::IsActive.eq(true));

        if !filter.include_archived {
            query = query.filter(chat_session::Column::IsArchived.eq(false));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(chat_session::Column::Title.contains(search));
        }

        query = query
            .order_by_desc(chat_session::Column::IsPinned)
            .order_by_with_nulls(chat_session::Column::LastMessageAt, Order::Desc, NullOrdering::Last)
            .order_by_desc(chat_session::Column::UpdatedAt);

        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        Ok(query.all(&self.conn).await?)
    }

    /// Applies the set fields of `update` to an owned session.
    pub async fn update_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        update: SessionUpdate,
    ) -> Result<chat_session::Model> {
        if let Some(title) = &update.title {
            check_title(title)?;
        }
        if let Some(t) = update.temperature {
            check_temperature(t)?;
        }
        if let Some(v) = update.max_tokens {
            check_positive("max_tokens", v)?;
        }
        if let Some(v) = update.summarization_threshold {
            check_positive("summarization_threshold", v)?;
        }
        if let Some(metadata) = &update.metadata {
            check_metadata(metadata)?;
        }

        let session = owned_session(&self.conn, user_id, session_id).await?;
        let mut active = session.into_active_model();

        if let Some(v) = update.title {
            active.title = Set(v.trim().to_string());
        }
        if let Some(v) = update.description {
            active.description = Set(v);
        }
        if let Some(v) = update.model_name {
            active.model_name = Set(v);
        }
        if let Some(v) = update.temperature {
            active.temperature = Set(v);
        }
        if let Some(v) = update.max_tokens {
            active.max_tokens = Set(v);
        }
        if let Some(v) = update.enable_summarization {
            active.enable_summarization = Set(v);
        }
        if let Some(v) = update.summarization_threshold {
            active.summarization_threshold = Set(v);
        }
        if let Some(v) = update.custom_system_prompt {
            active.custom_system_prompt = Set(v);
        }
        if let Some(v) = update.tags {
            active.tags = Set(v);
        }
        if let Some(v) = update.metadata {
            active.metadata = Set(v);
        }
        active.updated_at = Set(Utc::now());

        let session = active.update(&self.conn).await?;
        self.cache_invalidate(&cache::session_key(session_id)).await;
        debug!(%user_id, %session_id, "chat session updated");
        Ok(session)
    }

    /// Adds a completed turn to the session counters.
    pub async fn record_session_analytics(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        messages: i32,
        tokens: i64,
        cost: Decimal,
    ) -> Result<chat_session::Model> {
        if messages < 0 || tokens < 0 || cost.is_sign_negative() {
            return Err(StoreError::validation("analytics", "increments must not be negative"));
        }
        owned_session(&self.conn, user_id, session_id).await?;
        increment_session_counters(&self.conn, session_id, messages, tokens, cost).await?;
        self.cache_invalidate(&cache::session_key(session_id)).await;
        owned_session(&self.conn, user_id, session_id).await
    }

    /// Archives the session. It stays active and keeps its rows.
    pub async fn archive_session(&self, user_id: Uuid, session_id: Uuid) -> Result<chat_session::Model> {
        let session = owned_session(&self.conn, user_id, session_id).await?;
        let mut active = session.into_active_model();
        active.is_archived = Set(true);
        active.updated_at = Set(Utc::now());
        let session = active.update(&self.conn).await?;
        self.cache_invalidate(&cache::session_key(session_id)).await;
        info!(%user_id, %session_id, "chat session archived");
        Ok(session)
    }

    /// Soft delete: hides the session from listings, keeps every row.
    pub async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        let session = owned_session(&self.conn, user_id, session_id).await?;
        let mut active = session.into_active_model();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;
        self.cache_invalidate(&cache::session_key(session_id)).await;
        info!(%user_id, %session_id, "chat session soft-deleted");
        Ok(())
    }

    /// Permanently removes the session with its usage, feedback and
    /// documents. Returns the thread id whose checkpoints the caller must
    /// purge from the checkpointer.
    pub async fn hard_delete_session(&self, user_id: Uuid, session_id: Uuid) -> Result<String> {
        let txn = self.conn.begin().await?;

        let session = owned_session(&txn, user_id, session_id).await?;

        let usage = TokenUsageEntity::delete_many()
            .filter(token_usage::Column::ChatSessionId.eq(session_id))
            .exec(&txn)
            .await?;
        let feedback = MessageFeedbackEntity::delete_many()
            .filter(message_feedback::Column::ChatSessionId.eq(session_id))
            .exec(&txn)
            .await?;
        let documents = UserDocumentEntity::delete_many()
            .filter(user_document::Column::ChatSessionId.eq(session_id))
            .exec(&txn)
            .await?;
        ChatSessionEntity::delete_by_id(session_id).exec(&txn).await?;

        txn.commit().await?;
        self.cache_invalidate(&cache::session_key(session_id)).await;

        info!(
            %user_id,
            %session_id,
            usage_rows = usage.rows_affected,
            feedback_rows = feedback.rows_affected,
            document_rows = documents.rows_affected,
            "chat session permanently deleted"
        );
        Ok(session.thread_id())
    }

    /// Pins the session to the top of listings.
    pub async fn pin_session(&self, user_id: Uuid, session_id: Uuid) -> Result<chat_session::Model> {
        self.set_pinned(user_id, session_id, true).await
    }

    /// Reverses [`pin_session`](Self::pin_session).
    pub async fn unpin_session(&self, user_id: Uuid, session_id: Uuid) -> Result<chat_session::Model> {
        self.set_pinned(user_id, session_id, false).await
    }

    /// Flips the pin flag and returns the new state.
    pub async fn toggle_pin(&self, user_id: Uuid, session_id: Uuid) -> Result<bool> {
        let session = owned_session(&self.conn, user_id, session_id).await?;
        let pinned = !session.is_pinned;
        self.set_pinned(user_id, session_id, pinned).await?;
        Ok(pinned)
    }

    async fn set_pinned(&self, user_id: Uuid, session_id: Uuid, pinned: bool) -> Result<chat_session::Model> {
        let session = owned_session(&self.conn, user_id, session_id).await?;
        let mut active = session.into_active_model();
        active.is_pinned = Set(pinned);
        active.updated_at = Set(Utc::now());
        let session = active.update(&self.conn).await?;
        self.cache_invalidate(&cache::session_key(session_id)).await;
        Ok(session)
    }

    /// Usage and feedback totals of one session.
    pub async fn session_stats(&self, user_id: Uuid, session_id: Uuid) -> Result<SessionStats> {
        let session = owned_session(&self.conn, user_id, session_id).await?;

        let (total_tokens, total_cost, avg_response_time): (Option<i64>, Option<Decimal>, Option<f64>) =
            TokenUsageEntity::find()
                .select_only()
                .column_as(
                    Expr::col(token_usage::Column::TotalTokens).sum().cast_as(Alias::new("bigint")),
                    "total_tokens",
                )
                .column_as(Expr::col(token_usage::Column::TotalCost).sum(), "total_cost")
                .column_as(
                    SimpleExpr::from(Func::avg(
                        Expr::col(token_usage::Column::ResponseTimeMs).cast_as(Alias::new("real")),
                    )),
                    "avg_response_time",
                )
                .filter(token_usage::Column::ChatSessionId.eq(session_id))
                .into_tuple()
                .one(&self.conn)
                .await?
                .unwrap_or((None, None, None));

        let ratings: Vec<Rating> = MessageFeedbackEntity::find()
            .select_only()
            .column(message_feedback::Column::Rating)
            .filter(message_feedback::Column::ChatSessionId.eq(session_id))
            .into_tuple()
            .all(&self.conn)
            .await?;
        let feedback_count = ratings.len() as u64;
        let positive = ratings.iter().filter(|r| r.is_positive()).count();
        let satisfaction_rate =
            (feedback_count > 0).then(|| positive as f64 / feedback_count as f64 * 100.0);

        Ok(SessionStats {
            session_id,
            title: session.title,
            message_count: session.message_count,
            total_tokens: total_tokens.unwrap_or(0),
            total_cost: total_cost.unwrap_or(Decimal::ZERO),
            avg_response_time_ms: avg_response_time,
            feedback_count,
            satisfaction_rate,
        })
    }

    /// Totals across all of a user's sessions, soft-deleted ones included.
    pub async fn user_stats(&self, user_id: Uuid) -> Result<UserStats> {
        let base = ChatSessionEntity::find().filter(chat_session::Column::UserId.eq(user_id));

        let total_sessions = base.clone().count(&self.conn).await?;
        let active_sessions = base
            .clone()
            .filter(chat_session::Column::IsActive.eq(true))
            .count(&self.conn)
            .await?;
        let archived_sessions = base
            .clone()
            .filter(chat_session::Column::IsArchived.eq(true))
            .count(&self.conn)
            .await?;
        let pinned_sessions = base
            .clone()
            .filter(chat_session::Column::IsPinned.eq(true))
            .count(&self.conn)
            .await?;

        let (total_messages, total_tokens, total_cost): (Option<i64>, Option<i64>, Option<Decimal>) = base
            .select_only()
            .column_as(
                Expr::col(chat_session::Column::MessageCount).sum().cast_as(Alias::new("bigint")),
                "total_messages",
            )
            .column_as(
                Expr::col(chat_session::Column::TotalTokensUsed).sum().cast_as(Alias::new("bigint")),
                "total_tokens",
            )
            .column_as(Expr::col(chat_session::Column::TotalCost).sum(), "total_cost")
            .into_tuple()
            .one(&self.conn)
            .await?
            .unwrap_or((None, None, None));

        Ok(UserStats {
            user_id,
            total_sessions,
            active_sessions,
            archived_sessions,
            pinned_sessions,
            total_messages: total_messages.unwrap_or(0),
            total_tokens: total_tokens.unwrap_or(0),
            total_cost: total_cost.unwrap_or(Decimal::ZERO),
        })
    }

    /// Checkpointer configuration for a session's thread.
    pub async fn thread_config(&self, user_id: Uuid, session_id: Uuid) -> Result<ThreadConfig> {
        let session = self.get_session(user_id, session_id).await?;
        Ok(ThreadConfig {
            thread_id: session.thread_id(),
            user_id: session.user_id,
            model_name: session.model_name,
            temperature: session.temperature,
            max_tokens: session.max_tokens,
        })
    }

    /// Maps a checkpointer thread id back to its session row. A thread with
    /// no row (or another user's row) is reported as not found.
    pub async fn resolve_thread(&self, user_id: Uuid, thread_id: &str) -> Result<chat_session::Model> {
        let session_id =
            Uuid::parse_str(thread_id).map_err(|_| StoreError::not_found("thread", thread_id))?;
        self.get_session(user_id, session_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => StoreError::not_found("thread", thread_id),
                other => other,
            })
    }
}

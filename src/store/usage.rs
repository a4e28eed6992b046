use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::{Alias, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QuerySelect, Select, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::sessions::increment_session_counters;
use super::{owned_session, MetadataStore};
use crate::cache;
use crate::entity::token_usage::{self, Entity as TokenUsageEntity, RequestType};
use crate::entity::user_api_key::{self, Entity as UserApiKeyEntity};
use crate::entity::user::{self, Entity as UserEntity};
use crate::entity::user_preference::Entity as UserPreferenceEntity;
use crate::error::{Result, StoreError};
use crate::limits::{day_start, evaluate_key_limits, evaluate_quota, month_start, Decision, QuotaCheck, WindowUsage};

/// One AI request to record. Costs are derived from the price table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUsage {
    pub chat_session_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub tool_name: Option<String>,
    pub model_name: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub reasoning_tokens: u32,
    pub request_type: RequestType,
    pub endpoint: Option<String>,
    pub response_time_ms: Option<u32>,
    #[serde(default)]
    pub was_cached: bool,
    #[serde(default)]
    pub had_error: bool,
    pub error_message: Option<String>,
}

impl NewUsage {
    /// A plain chat request with no session, key or tool attached.
    pub fn chat(model_name: impl Into<String>, prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            chat_session_id: None,
            api_key_id: None,
            tool_name: None,
            model_name: model_name.into(),
            prompt_tokens,
            completion_tokens,
            reasoning_tokens: 0,
            request_type: RequestType::Chat,
            endpoint: None,
            response_time_ms: None,
            was_cached: false,
            had_error: false,
            error_message: None,
        }
    }

    pub fn in_session(mut self, session_id: Uuid) -> Self {
        self.chat_session_id = Some(session_id);
        self
    }

    pub fn with_api_key(mut self, key_id: Uuid) -> Self {
        self.api_key_id = Some(key_id);
        self
    }

    pub fn with_response_time(mut self, ms: u32) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    /// Prompt, completion and reasoning tokens together.
    pub fn total_tokens(&self) -> i64 {
        i64::from(self.prompt_tokens) + i64::from(self.completion_tokens) + i64::from(self.reasoning_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model_name: String,
    pub requests: i64,
    pub tokens: i64,
    pub cost: Decimal,
}

/// Usage over the trailing `period_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub period_days: u32,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: Decimal,
    pub avg_tokens_per_request: f64,
    pub avg_response_time_ms: Option<f64>,
    /// Most expensive model first.
    pub by_model: Vec<ModelUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: Decimal,
}

struct Totals {
    requests: i64,
    tokens: i64,
    cost: Decimal,
}

async fn totals<C>(db: &C, query: Select<TokenUsageEntity>) -> Result<Totals>
where
    C: ConnectionTrait,
{
    let (requests, tokens, cost): (i64, Option<i64>, Option<Decimal>) = query
        .select_only()
        .column_as(Expr::col(token_usage::Column::Id).count(), "requests")
        .column_as(
            Expr::col(token_usage::Column::TotalTokens).sum().cast_as(Alias::new("bigint")),
            "tokens",
        )
        .column_as(Expr::col(token_usage::Column::TotalCost).sum(), "cost")
        .into_tuple()
        .one(db)
        .await?
        .unwrap_or((0, None, None));

    Ok(Totals {
        requests,
        tokens: tokens.unwrap_or(0),
        cost: cost.unwrap_or(Decimal::ZERO),
    })
}

/// Requests and tokens of `user_id` in the current UTC day and month.
pub(crate) async fn window_usage<C>(db: &C, user_id: Uuid, now: DateTime<Utc>) -> Result<WindowUsage>
where
    C: ConnectionTrait,
{
    let by_user = TokenUsageEntity::find().filter(token_usage::Column::UserId.eq(user_id));

    let today = totals(
        db,
        by_user.clone().filter(token_usage::Column::CreatedAt.gte(day_start(now))),
    )
    .await?;
    let month = totals(db, by_user.filter(token_usage::Column::CreatedAt.gte(month_start(now)))).await?;

    Ok(WindowUsage {
        requests_today: today.requests,
        tokens_today: today.tokens,
        tokens_this_month: month.tokens,
    })
}

/// Takes the user's row lock until the transaction ends.
///
/// A no-op update rather than `SELECT ... FOR UPDATE`: SQLite ignores row
/// locks but still hands the write lock to the first writer, so both
/// backends serialize concurrent recorders of the same user.
async fn lock_user(txn: &DatabaseTransaction, user_id: Uuid) -> Result<()> {
    let locked = UserEntity::update_many()
        .col_expr(user::Column::Email, Expr::col(user::Column::Email).into())
        .filter(user::Column::Id.eq(user_id))
        .exec(txn)
        .await?;
    if locked.rows_affected == 0 {
        return Err(StoreError::not_found("user", user_id));
    }
    Ok(())
}

fn check_requested_tokens(tokens: i64) -> Result<()> {
    if tokens < 0 {
        return Err(StoreError::validation("additional_tokens", "must not be negative"));
    }
    Ok(())
}

impl MetadataStore {
    /// Records a request and adds it to its session's counters, in one
    /// transaction. The session and API key, when given, must belong to
    /// `user_id`.
    pub async fn record_usage(&self, user_id: Uuid, usage: NewUsage) -> Result<token_usage::Model> {
        let txn = self.conn.begin().await?;
        let session_id = usage.chat_session_id;
        let model = self.insert_usage(&txn, user_id, usage).await?;
        txn.commit().await?;

        if let Some(session_id) = session_id {
            self.cache_invalidate(&cache::session_key(session_id)).await;
        }
        Ok(model)
    }

    /// Like [`record_usage`](Self::record_usage), but refuses the request
    /// when it would cross one of the user's limits.
    ///
    /// The check and the insert share a transaction that first locks the
    /// user's row, so concurrent requests for one user are serialized and
    /// cannot both pass a check that only one of them fits.
    /// Nothing is written when the limit is exceeded.
    pub async fn record_usage_within_quota(&self, user_id: Uuid, usage: NewUsage) -> Result<token_usage::Model> {
        let txn = self.conn.begin().await?;

        lock_user(&txn, user_id).await?;

        let limits = UserPreferenceEntity::find_by_id(user_id)
            .one(&txn)
            .await?
            .map(|prefs| prefs.usage_limits())
            .unwrap_or_default();

        let window = window_usage(&txn, user_id, Utc::now()).await?;
        if let Decision::Denied(reason) = evaluate_quota(&limits, &window, usage.total_tokens()) {
            txn.rollback().await?;
            warn!(%user_id, tokens = usage.total_tokens(), %reason, "usage refused");
            return Err(reason.into());
        }

        let session_id = usage.chat_session_id;
        let model = self.insert_usage(&txn, user_id, usage).await?;
        txn.commit().await?;

        if let Some(session_id) = session_id {
            self.cache_invalidate(&cache::session_key(session_id)).await;
        }
        Ok(model)
    }

    async fn insert_usage(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        usage: NewUsage,
    ) -> Result<token_usage::Model> {
        if usage.model_name.trim().is_empty() {
            return Err(StoreError::validation("model_name", "must not be empty"));
        }
        let total_tokens = i32::try_from(usage.total_tokens())
            .map_err(|_| StoreError::validation("tokens", "total exceeds the storable range"))?;
        let prompt_tokens = i32::try_from(usage.prompt_tokens)
            .map_err(|_| StoreError::validation("prompt_tokens", "exceeds the storable range"))?;
        let completion_tokens = i32::try_from(usage.completion_tokens)
            .map_err(|_| StoreError::validation("completion_tokens", "exceeds the storable range"))?;
        let reasoning_tokens = i32::try_from(usage.reasoning_tokens)
            .map_err(|_| StoreError::validation("reasoning_tokens", "exceeds the storable range"))?;
        let response_time_ms = usage
            .response_time_ms
            .map(i32::try_from)
            .transpose()
            .map_err(|_| StoreError::validation("response_time_ms", "exceeds the storable range"))?;

        if let Some(session_id) = usage.chat_session_id {
            owned_session(txn, user_id, session_id).await?;
        }
        if let Some(key_id) = usage.api_key_id {
            UserApiKeyEntity::find_by_id(key_id)
                .one(txn)
                .await?
                .filter(|key| key.user_id == user_id)
                .ok_or_else(|| StoreError::not_found("api key", key_id))?;
        }

        let cost = self.prices.cost_with_reasoning(
            &usage.model_name,
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.reasoning_tokens,
        );
        let now = Utc::now();

        let model = token_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            chat_session_id: Set(usage.chat_session_id),
            api_key_id: Set(usage.api_key_id),
            tool_name: Set(usage.tool_name),
            model_name: Set(usage.model_name),
            prompt_tokens: Set(prompt_tokens),
            completion_tokens: Set(completion_tokens),
            reasoning_tokens: Set(reasoning_tokens),
            total_tokens: Set(total_tokens),
            prompt_cost: Set(cost.prompt_cost),
            completion_cost: Set(cost.completion_cost),
            total_cost: Set(cost.total_cost),
            request_type: Set(usage.request_type),
            endpoint: Set(usage.endpoint),
            response_time_ms: Set(response_time_ms),
            was_cached: Set(usage.was_cached),
            had_error: Set(usage.had_error),
            error_message: Set(usage.error_message),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;

        if let Some(session_id) = model.chat_session_id {
            // Only chat turns count as messages
            let messages = i32::from(model.request_type == RequestType::Chat);
            increment_session_counters(txn, session_id, messages, i64::from(total_tokens), cost.total_cost)
                .await?;
        }

        if let Some(key_id) = model.api_key_id {
            UserApiKeyEntity::update_many()
                .col_expr(
                    user_api_key::Column::UsageCount,
                    Expr::col(user_api_key::Column::UsageCount).add(1),
                )
                .col_expr(
                    user_api_key::Column::TotalTokensUsed,
                    Expr::col(user_api_key::Column::TotalTokensUsed).add(i64::from(total_tokens)),
                )
                .col_expr(user_api_key::Column::LastUsedAt, Expr::value(now))
                .filter(user_api_key::Column::Id.eq(key_id))
                .exec(txn)
                .await?;
        }

        info!(
            %user_id,
            session_id = ?model.chat_session_id,
            model = %model.model_name,
            tokens = model.total_tokens,
            cost = %model.total_cost,
            "token usage recorded"
        );
        Ok(model)
    }

    /// Advisory quota check for `additional_tokens` more tokens.
    ///
    /// Users without a preference row are always allowed. Because nothing is
    /// reserved, two concurrent callers can both be allowed; use
    /// [`record_usage_within_quota`](Self::record_usage_within_quota) when
    /// that matters.
    pub async fn check_user_limits(&self, user_id: Uuid, additional_tokens: i64) -> Result<QuotaCheck> {
        check_requested_tokens(additional_tokens)?;
        let usage = window_usage(&self.conn, user_id, Utc::now()).await?;

        let Some(prefs) = UserPreferenceEntity::find_by_id(user_id).one(&self.conn).await? else {
            return Ok(QuotaCheck {
                decision: Decision::Allowed,
                usage,
            });
        };

        let decision = evaluate_quota(&prefs.usage_limits(), &usage, additional_tokens);
        debug!(%user_id, additional_tokens, allowed = decision.is_allowed(), "quota checked");
        Ok(QuotaCheck { decision, usage })
    }

    /// Same boundary as [`check_user_limits`](Self::check_user_limits),
    /// against the daily and monthly limits of one API key.
    pub async fn check_key_limits(&self, user_id: Uuid, key_id: Uuid, additional_tokens: i64) -> Result<Decision> {
        check_requested_tokens(additional_tokens)?;
        let key = UserApiKeyEntity::find_by_id(key_id)
            .one(&self.conn)
            .await?
            .filter(|key| key.user_id == user_id)
            .ok_or_else(|| StoreError::not_found("api key", key_id))?;

        let now = Utc::now();
        let by_key = TokenUsageEntity::find().filter(token_usage::Column::ApiKeyId.eq(key_id));
        let today = totals(
            &self.conn,
            by_key.clone().filter(token_usage::Column::CreatedAt.gte(day_start(now))),
        )
        .await?;
        let month = totals(
            &self.conn,
            by_key.filter(token_usage::Column::CreatedAt.gte(month_start(now))),
        )
        .await?;

        Ok(evaluate_key_limits(
            key.daily_limit.map(i64::from),
            key.monthly_limit.map(i64::from),
            today.tokens,
            month.tokens,
            additional_tokens,
        ))
    }

    /// Usage over the trailing `days` days, with a per-model breakdown.
    pub async fn usage_stats(&self, user_id: Uuid, days: u32) -> Result<UsageStats> {
        let cutoff = Utc::now()
            .checked_sub_signed(chrono::Duration::days(i64::from(days)))
            .ok_or_else(|| StoreError::validation("days", "out of range"))?;
        let window = TokenUsageEntity::find()
            .filter(token_usage::Column::UserId.eq(user_id))
            .filter(token_usage::Column::CreatedAt.gte(cutoff));

        let all = totals(&self.conn, window.clone()).await?;

        let avg_response_time: Option<f64> = window
            .clone()
            .select_only()
            .column_as(
                SimpleExpr::from(Func::avg(
                    Expr::col(token_usage::Column::ResponseTimeMs).cast_as(Alias::new("real")),
                )),
                "avg_response_time",
            )
            .into_tuple::<Option<f64>>()
            .one(&self.conn)
            .await?
            .flatten();

        let rows: Vec<(String, i64, Option<i64>, Option<Decimal>)> = window
            .select_only()
            .column(token_usage::Column::ModelName)
            .column_as(Expr::col(token_usage::Column::Id).count(), "requests")
            .column_as(
                Expr::col(token_usage::Column::TotalTokens).sum().cast_as(Alias::new("bigint")),
                "tokens",
            )
            .column_as(Expr::col(token_usage::Column::TotalCost).sum(), "cost")
            .group_by(token_usage::Column::ModelName)
            .into_tuple()
            .all(&self.conn)
            .await?;

        let mut by_model: Vec<ModelUsage> = rows
            .into_iter()
            .map(|(model_name, requests, tokens, cost)| ModelUsage {
                model_name,
                requests,
                tokens: tokens.unwrap_or(0),
                cost: cost.unwrap_or(Decimal::ZERO),
            })
            .collect();
        by_model.sort_by(|a, b| b.cost.cmp(&a.cost).then_with(|| a.model_name.cmp(&b.model_name)));

        let avg_tokens_per_request = if all.requests > 0 {
            all.tokens as f64 / all.requests as f64
        } else {
            0.0
        };

        Ok(UsageStats {
            period_days: days,
            total_requests: all.requests,
            total_tokens: all.tokens,
            total_cost: all.cost,
            avg_tokens_per_request,
            avg_response_time_ms: avg_response_time,
            by_model,
        })
    }

    /// Usage during one UTC calendar day.
    pub async fn daily_usage(&self, user_id: Uuid, date: NaiveDate) -> Result<DailyUsage> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = date
            .checked_add_days(Days::new(1))
            .map(|next| next.and_time(NaiveTime::MIN).and_utc())
            .ok_or_else(|| StoreError::validation("date", "out of range"))?;

        let day = totals(
            &self.conn,
            TokenUsageEntity::find()
                .filter(token_usage::Column::UserId.eq(user_id))
                .filter(token_usage::Column::CreatedAt.gte(start))
                .filter(token_usage::Column::CreatedAt.lt(end)),
        )
        .await?;

        Ok(DailyUsage {
            date,
            total_requests: day.requests,
            total_tokens: day.tokens,
            total_cost: day.cost,
        })
    }
}

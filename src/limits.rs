//! Quota and rate-limit decisions.
//!
//! These functions are pure: the store gathers counters from the database and
//! hands them here. A decision is either [`Decision::Allowed`] or
//! [`Decision::Denied`] carrying a [`LimitExceeded`] whose `Display` is the
//! human-readable reason.

use chrono::{DateTime, Datelike, Days, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::user_tool::RateLimitPeriod;

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimitExceeded {
    #[error("Daily message limit reached ({limit})")]
    DailyMessages { limit: i64, used: i64 },

    #[error("Daily token limit reached ({limit})")]
    DailyTokens { limit: i64, used: i64, requested: i64 },

    #[error("Monthly token limit reached ({limit})")]
    MonthlyTokens { limit: i64, used: i64, requested: i64 },

    #[error("Daily limit exceeded ({limit} tokens) for API key")]
    KeyDailyTokens { limit: i64, used: i64, requested: i64 },

    #[error("Monthly limit exceeded ({limit} tokens) for API key")]
    KeyMonthlyTokens { limit: i64, used: i64, requested: i64 },

    #[error("Rate limit reached for tool {tool}: {limit} per {period}")]
    ToolRate {
        tool: String,
        limit: i64,
        period: RateLimitPeriod,
        reset_at: DateTime<Utc>,
    },

    #[error("Tool {tool} is not enabled")]
    ToolNotEnabled { tool: String },

    #[error("Tool {tool} is awaiting admin approval")]
    ToolNotApproved { tool: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied(LimitExceeded),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Human-readable reason when denied.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Allowed => None,
            Self::Denied(why) => Some(why.to_string()),
        }
    }

    pub fn into_result(self) -> Result<(), LimitExceeded> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(why) => Err(why),
        }
    }
}

/// A user's configured limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub daily_messages: i64,
    pub daily_tokens: i64,
    pub monthly_tokens: i64,
}

impl UsageLimits {
    pub fn is_unlimited(&self) -> bool {
        self.daily_messages <= 0 && self.daily_tokens <= 0 && self.monthly_tokens <= 0
    }
}

/// Usage already consumed in the current windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub requests_today: i64,
    pub tokens_today: i64,
    pub tokens_this_month: i64,
}

/// Outcome of a quota check together with the counters it was based on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub decision: Decision,
    pub usage: WindowUsage,
}

impl QuotaCheck {
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    pub fn reason(&self) -> Option<String> {
        self.decision.reason()
    }
}

/// Whether `used + requested` goes past `limit`. A negative request counts
/// as zero and the sum saturates.
fn exceeds(used: i64, requested: i64, limit: i64) -> bool {
    used.saturating_add(requested.max(0)) > limit
}

/// Decides whether `additional_tokens` more may be consumed.
///
/// Landing exactly on a token limit is allowed; one token over is denied.
/// The message limit denies once the count of today's requests has reached it.
pub fn evaluate_quota(limits: &UsageLimits, usage: &WindowUsage, additional_tokens: i64) -> Decision {
    if limits.daily_messages > 0 && usage.requests_today >= limits.daily_messages {
        return Decision::Denied(LimitExceeded::DailyMessages {
            limit: limits.daily_messages,
            used: usage.requests_today,
        });
    }

    if limits.daily_tokens > 0 && exceeds(usage.tokens_today, additional_tokens, limits.daily_tokens) {
        return Decision::Denied(LimitExceeded::DailyTokens {
            limit: limits.daily_tokens,
            used: usage.tokens_today,
            requested: additional_tokens,
        });
    }

    if limits.monthly_tokens > 0 && exceeds(usage.tokens_this_month, additional_tokens, limits.monthly_tokens) {
        return Decision::Denied(LimitExceeded::MonthlyTokens {
            limit: limits.monthly_tokens,
            used: usage.tokens_this_month,
            requested: additional_tokens,
        });
    }

    Decision::Allowed
}

/// Same boundary as [`evaluate_quota`], for a single provider key.
pub fn evaluate_key_limits(
    daily_limit: Option<i64>,
    monthly_limit: Option<i64>,
    tokens_today: i64,
    tokens_this_month: i64,
    additional_tokens: i64,
) -> Decision {
    if let Some(limit) = daily_limit.filter(|l| *l > 0) {
        if exceeds(tokens_today, additional_tokens, limit) {
            return Decision::Denied(LimitExceeded::KeyDailyTokens {
                limit,
                used: tokens_today,
                requested: additional_tokens,
            });
        }
    }
    if let Some(limit) = monthly_limit.filter(|l| *l > 0) {
        if exceeds(tokens_this_month, additional_tokens, limit) {
            return Decision::Denied(LimitExceeded::KeyMonthlyTokens {
                limit,
                used: tokens_this_month,
                requested: additional_tokens,
            });
        }
    }
    Decision::Allowed
}

/// Result of a tool rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub decision: Decision,
    /// `None` when the tool has no limit.
    pub limit: Option<i64>,
    pub current_usage: i64,
    pub remaining: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitStatus {
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    pub(crate) fn unlimited(current_usage: i64) -> Self {
        Self {
            decision: Decision::Allowed,
            limit: None,
            current_usage,
            remaining: None,
            reset_at: None,
        }
    }

    pub(crate) fn denied(reason: LimitExceeded) -> Self {
        Self {
            decision: Decision::Denied(reason),
            limit: None,
            current_usage: 0,
            remaining: Some(0),
            reset_at: None,
        }
    }
}

/// Allows iff fewer than `limit` uses fell inside the trailing window.
pub fn evaluate_rate_limit(
    tool: &str,
    limit: Option<i64>,
    period: RateLimitPeriod,
    uses_in_window: i64,
    now: DateTime<Utc>,
) -> RateLimitStatus {
    let Some(limit) = limit.filter(|l| *l > 0) else {
        return RateLimitStatus::unlimited(uses_in_window);
    };

    let reset_at = now + period.window();
    let decision = if uses_in_window < limit {
        Decision::Allowed
    } else {
        Decision::Denied(LimitExceeded::ToolRate {
            tool: tool.to_string(),
            limit,
            period,
            reset_at,
        })
    };

    RateLimitStatus {
        decision,
        limit: Some(limit),
        current_usage: uses_in_window,
        remaining: Some((limit - uses_in_window).max(0)),
        reset_at: Some(reset_at),
    }
}

impl RateLimitPeriod {
    /// Length of the trailing window.
    pub fn window(self) -> Duration {
        match self {
            Self::Minute => Duration::minutes(1),
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
        }
    }
}

/// Midnight UTC of the day containing `now`.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Midnight UTC of the first day of the month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now.date_naive() - Days::new(u64::from(now.day0()));
    first.and_time(NaiveTime::MIN).and_utc()
}

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, IntoActiveModel, Set};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::MetadataStore;
use crate::cache;
use crate::entity::user_preference::{self, Entity as UserPreferenceEntity, SummarizationStyle, Theme};
use crate::error::{Result, StoreError};
use crate::limits::UsageLimits;
use crate::pricing::DEFAULT_MODEL;

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: i32 = 2048;
const DEFAULT_SUMMARIZATION_TRIGGER: i32 = 384;
const DEFAULT_MAX_SUMMARY_TOKENS: i32 = 128;
const DEFAULT_DAILY_MESSAGE_LIMIT: i32 = 100;
const DEFAULT_DAILY_TOKEN_LIMIT: i32 = 50_000;

/// Partial update of a user's preferences. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    pub default_model: Option<String>,
    pub default_temperature: Option<f64>,
    pub default_max_tokens: Option<i32>,
    pub enable_auto_summarization: Option<bool>,
    pub summarization_trigger_tokens: Option<i32>,
    pub max_summary_tokens: Option<i32>,
    pub summarization_style: Option<SummarizationStyle>,
    /// `Some(None)` clears the prompt.
    pub custom_system_prompt: Option<Option<String>>,
    pub use_custom_system_prompt: Option<bool>,
    pub response_language: Option<String>,
    pub enable_streaming: Option<bool>,
    pub enable_code_execution: Option<bool>,
    pub daily_message_limit: Option<i32>,
    pub daily_token_limit: Option<i32>,
    pub monthly_token_limit: Option<i32>,
    pub theme: Option<Theme>,
    pub show_token_count: Option<bool>,
    pub enable_notifications: Option<bool>,
    pub save_conversation_history: Option<bool>,
    pub allow_data_training: Option<bool>,
}

/// Model settings a new session inherits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: i32,
    pub enable_summarization: bool,
    pub summarization_threshold: i32,
    pub custom_system_prompt: Option<String>,
}

impl From<&user_preference::Model> for SessionDefaults {
    fn from(prefs: &user_preference::Model) -> Self {
        Self {
            model_name: prefs.default_model.clone(),
            temperature: prefs.default_temperature,
            max_tokens: prefs.default_max_tokens,
            enable_summarization: prefs.enable_auto_summarization,
            summarization_threshold: prefs.summarization_trigger_tokens,
            custom_system_prompt: prefs
                .custom_system_prompt
                .clone()
                .filter(|_| prefs.use_custom_system_prompt),
        }
    }
}

impl user_preference::Model {
    pub fn usage_limits(&self) -> UsageLimits {
        UsageLimits {
            daily_messages: i64::from(self.daily_message_limit),
            daily_tokens: i64::from(self.daily_token_limit),
            monthly_tokens: i64::from(self.monthly_token_limit),
        }
    }

    /// True if any limit is configured.
    pub fn has_usage_limits(&self) -> bool {
        !self.usage_limits().is_unlimited()
    }
}

fn default_preferences(user_id: Uuid) -> user_preference::ActiveModel {
    let now = Utc::now();
    user_preference::ActiveModel {
        user_id: Set(user_id),
        default_model: Set(DEFAULT_MODEL.to_string()),
        default_temperature: Set(DEFAULT_TEMPERATURE),
        default_max_tokens: Set(DEFAULT_MAX_TOKENS),
        enable_auto_summarization: Set(true),
        summarization_trigger_tokens: Set(DEFAULT_SUMMARIZATION_TRIGGER),
        max_summary_tokens: Set(DEFAULT_MAX_SUMMARY_TOKENS),
        summarization_style: Set(SummarizationStyle::Concise),
        custom_system_prompt: Set(None),
        use_custom_system_prompt: Set(false),
        response_language: Set("en".to_string()),
        enable_streaming: Set(true),
        enable_code_execution: Set(false),
        daily_message_limit: Set(DEFAULT_DAILY_MESSAGE_LIMIT),
        daily_token_limit: Set(DEFAULT_DAILY_TOKEN_LIMIT),
        monthly_token_limit: Set(0),
        theme: Set(Theme::Auto),
        show_token_count: Set(false),
        enable_notifications: Set(true),
        save_conversation_history: Set(true),
        allow_data_training: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

pub(crate) fn check_temperature(value: f64) -> Result<()> {
    if !(0.0..=2.0).contains(&value) {
        return Err(StoreError::validation("temperature", "must be between 0.0 and 2.0"));
    }
    Ok(())
}

pub(crate) fn check_positive(field: &'static str, value: i32) -> Result<()> {
    if value <= 0 {
        return Err(StoreError::validation(field, "must be positive"));
    }
    Ok(())
}

fn check_limit(field: &'static str, value: i32) -> Result<()> {
    if value < 0 {
        return Err(StoreError::validation(field, "must be zero (unlimited) or positive"));
    }
    Ok(())
}

/// Reads the row, inserting defaults first if the user has none.
pub(crate) async fn load_or_create<C>(db: &C, user_id: Uuid) -> Result<user_preference::Model>
where
    C: ConnectionTrait,
{
    if let Some(prefs) = UserPreferenceEntity::find_by_id(user_id).one(db).await? {
        return Ok(prefs);
    }

    // A concurrent creator may win; either way the row exists afterwards
    UserPreferenceEntity::insert(default_preferences(user_id))
        .on_conflict(
            OnConflict::column(user_preference::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    debug!(%user_id, "created default preferences");

    UserPreferenceEntity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| StoreError::not_found("user preferences", user_id))
}

impl MetadataStore {
    /// Returns the user's preferences, creating the default row on first use.
    pub async fn get_or_create_preferences(&self, user_id: Uuid) -> Result<user_preference::Model> {
        let key = cache::preference_key(user_id);
        if let Some(prefs) = self.cache_get::<user_preference::Model>(&key).await {
            return Ok(prefs);
        }

        let prefs = load_or_create(&self.conn, user_id).await?;
        self.cache_put(&key, &prefs).await;
        Ok(prefs)
    }

    /// Applies the fields present in `update`.
    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        update: PreferencesUpdate,
    ) -> Result<user_preference::Model> {
        if let Some(t) = update.default_temperature {
            check_temperature(t)?;
        }
        if let Some(v) = update.default_max_tokens {
            check_positive("default_max_tokens", v)?;
        }
        if let Some(v) = update.summarization_trigger_tokens {
            check_positive("summarization_trigger_tokens", v)?;
        }
        if let Some(v) = update.max_summary_tokens {
            check_positive("max_summary_tokens", v)?;
        }
        if let Some(v) = update.daily_message_limit {
            check_limit("daily_message_limit", v)?;
        }
        if let Some(v) = update.daily_token_limit {
            check_limit("daily_token_limit", v)?;
        }
        if let Some(v) = update.monthly_token_limit {
            check_limit("monthly_token_limit", v)?;
        }
        if let Some(model) = &update.default_model {
            if model.trim().is_empty() {
                return Err(StoreError::validation("default_model", "must not be empty"));
            }
        }

        let prefs = load_or_create(&self.conn, user_id).await?;
        let mut active = prefs.into_active_model();

        if let Some(v) = update.default_model {
            active.default_model = Set(v);
        }
        if let Some(v) = update.default_temperature {
            active.default_temperature = Set(v);
        }
        if let Some(v) = update.default_max_tokens {
            active.default_max_tokens = Set(v);
        }
        if let Some(v) = update.enable_auto_summarization {
            active.enable_auto_summarization = Set(v);
        }
        if let Some(v) = update.summarization_trigger_tokens {
            active.summarization_trigger_tokens = Set(v);
        }
        if let Some(v) = update.max_summary_tokens {
            active.max_summary_tokens = Set(v);
        }
        if let Some(v) = update.summarization_style {
            active.summarization_style = Set(v);
        }
        if let Some(v) = update.custom_system_prompt {
            active.custom_system_prompt = Set(v);
        }
        if let Some(v) = update.use_custom_system_prompt {
            active.use_custom_system_prompt = Set(v);
        }
        if let Some(v) = update.response_language {
            active.response_language = Set(v);
        }
        if let Some(v) = update.enable_streaming {
            active.enable_streaming = Set(v);
        }
        if let Some(v) = update.enable_code_execution {
            active.enable_code_execution = Set(v);
        }
        if let Some(v) = update.daily_message_limit {
            active.daily_message_limit = Set(v);
        }
        if let Some(v) = update.daily_token_limit {
            active.daily_token_limit = Set(v);
        }
        if let Some(v) = update.monthly_token_limit {
            active.monthly_token_limit = Set(v);
        }
        if let Some(v) = update.theme {
            active.theme = Set(v);
        }
        if let Some(v) = update.show_token_count {
            active.show_token_count = Set(v);
        }
        if let Some(v) = update.enable_notifications {
            active.enable_notifications = Set(v);
        }
        if let Some(v) = update.save_conversation_history {
            active.save_conversation_history = Set(v);
        }
        if let Some(v) = update.allow_data_training {
            active.allow_data_training = Set(v);
        }
        active.updated_at = Set(Utc::now());

        let prefs = active.update(&self.conn).await?;
        self.cache_invalidate(&cache::preference_key(user_id)).await;
        info!(%user_id, "preferences updated");
        Ok(prefs)
    }

    /// Model settings for a new session.
    pub async fn session_defaults(&self, user_id: Uuid) -> Result<SessionDefaults> {
        let prefs = self.get_or_create_preferences(user_id).await?;
        Ok(SessionDefaults::from(&prefs))
    }

    /// Restores the model and prompt settings. Limits and UI settings are kept.
    pub async fn reset_preferences(&self, user_id: Uuid) -> Result<user_preference::Model> {
        let prefs = load_or_create(&self.conn, user_id).await?;
        let mut active = prefs.into_active_model();
        active.default_model = Set(DEFAULT_MODEL.to_string());
        active.default_temperature = Set(DEFAULT_TEMPERATURE);
        active.default_max_tokens = Set(DEFAULT_MAX_TOKENS);
        active.enable_auto_summarization = Set(true);
        active.custom_system_prompt = Set(None);
        active.use_custom_system_prompt = Set(false);
        active.updated_at = Set(Utc::now());

        let prefs = active.update(&self.conn).await?;
        self.cache_invalidate(&cache::preference_key(user_id)).await;
        info!(%user_id, "preferences reset");
        Ok(prefs)
    }

    /// Whether the user has any daily or monthly limit configured.
    pub async fn has_usage_limits(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.get_or_create_preferences(user_id).await?.has_usage_limits())
    }
}

//! Per-user defaults and usage limits, one row per user.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum SummarizationStyle {
    #[sea_orm(string_value = "concise")]
    Concise,
    #[sea_orm(string_value = "detailed")]
    Detailed,
    #[sea_orm(string_value = "bullet")]
    Bullet,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[sea_orm(string_value = "light")]
    Light,
    #[sea_orm(string_value = "dark")]
    Dark,
    #[sea_orm(string_value = "auto")]
    Auto,
}

/// Limits of `0` mean unlimited.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_preferences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    pub default_model: String,
    pub default_temperature: f64,
    pub default_max_tokens: i32,
    pub enable_auto_summarization: bool,
    pub summarization_trigger_tokens: i32,
    pub max_summary_tokens: i32,
    pub summarization_style: SummarizationStyle,
    #[sea_orm(column_type = "Text", nullable)]
    pub custom_system_prompt: Option<String>,
    pub use_custom_system_prompt: bool,
    pub response_language: String,
    pub enable_streaming: bool,
    pub enable_code_execution: bool,
    pub daily_message_limit: i32,
    pub daily_token_limit: i32,
    pub monthly_token_limit: i32,
    pub theme: Theme,
    pub show_token_count: bool,
    pub enable_notifications: bool,
    pub save_conversation_history: bool,
    pub allow_data_training: bool,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! User-supplied provider credentials, stored encrypted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[sea_orm(string_value = "openai")]
    Openai,
    #[sea_orm(string_value = "anthropic")]
    Anthropic,
    #[sea_orm(string_value = "google")]
    Google,
    #[sea_orm(string_value = "cohere")]
    Cohere,
    #[sea_orm(string_value = "huggingface")]
    Huggingface,
    #[sea_orm(string_value = "azure")]
    Azure,
    #[sea_orm(string_value = "custom")]
    Custom,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Openai => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Google => "Google AI",
            Self::Cohere => "Cohere",
            Self::Huggingface => "Hugging Face",
            Self::Azure => "Azure OpenAI",
            Self::Custom => "Custom Provider",
        }
    }
}

/// `encrypted_key` is `nonce ‖ ciphertext` and is skipped when serializing.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    pub provider: Provider,
    pub provider_display_name: String,
    #[serde(skip_serializing, default)]
    pub encrypted_key: Vec<u8>,
    pub key_name: String,
    pub key_prefix: String,
    pub is_active: bool,
    pub is_default: bool,
    pub is_validated: bool,
    pub last_validated_at: Option<ChronoDateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub validation_error: Option<String>,
    pub usage_count: i32,
    pub total_tokens_used: i64,
    pub last_used_at: Option<ChronoDateTimeUtc>,
    pub daily_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
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
    #[sea_orm(has_many = "super::token_usage::Entity")]
    TokenUsage,
}

impl Related<super::token_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TokenUsage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! Token usage ledger. One immutable row per AI request.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    #[sea_orm(string_value = "chat")]
    Chat,
    #[sea_orm(string_value = "summarization")]
    Summarization,
    #[sea_orm(string_value = "embedding")]
    Embedding,
    #[sea_orm(string_value = "tool_call")]
    ToolCall,
    #[sea_orm(string_value = "vision")]
    Vision,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "token_usage")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    #[sea_orm(indexed)]
    pub chat_session_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub tool_name: Option<String>,
    pub model_name: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub reasoning_tokens: i32,
    pub total_tokens: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 9)))")]
    pub prompt_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 9)))")]
    pub completion_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 9)))")]
    pub total_cost: Decimal,
    pub request_type: RequestType,
    pub endpoint: Option<String>,
    pub response_time_ms: Option<i32>,
    pub was_cached: bool,
    pub had_error: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    #[sea_orm(indexed)]
    pub created_at: ChronoDateTimeUtc,
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
    #[sea_orm(
        belongs_to = "super::chat_session::Entity",
        from = "Column::ChatSessionId",
        to = "super::chat_session::Column::Id",
        on_delete = "Cascade"
    )]
    ChatSession,
    #[sea_orm(
        belongs_to = "super::user_api_key::Entity",
        from = "Column::ApiKeyId",
        to = "super::user_api_key::Column::Id",
        on_delete = "SetNull"
    )]
    UserApiKey,
}

impl Related<super::chat_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatSession.def()
    }
}

impl Related<super::user_api_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserApiKey.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! Chat session entity: user-facing metadata of one conversation thread.
//!
//! The row's `id` is also the checkpointer's thread id. Message bodies and
//! turn state live in the checkpointer and never in this table.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::Tags;

/// Sea-ORM entity model for the `chat_sessions` table.
///
/// | Column                  | Type          | Description                              |
/// |-------------------------|---------------|------------------------------------------|
/// | id                      | UUID (PK)     | Session id and checkpointer thread id    |
/// | user_id                 | UUID (FK)     | Owner, cascades on user delete           |
/// | title / description     | TEXT          | Display metadata                         |
/// | model_name ... max_tokens | -           | Model configuration for the thread       |
/// | is_active / is_archived / is_pinned | BOOL | Status flags                       |
/// | message_count, total_tokens_used, total_cost | - | Counters updated per turn     |
/// | last_message_at         | TIMESTAMPTZ   | Time of the latest recorded turn         |
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chat_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    pub title: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: i32,
    pub enable_summarization: bool,
    pub summarization_threshold: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub custom_system_prompt: Option<String>,
    pub is_active: bool,
    pub is_archived: bool,
    pub is_pinned: bool,
    #[sea_orm(column_type = "Json")]
    pub tags: Tags,
    /// Free-form client metadata, always a JSON object.
    #[sea_orm(column_type = "Json")]
    pub metadata: Json,
    pub message_count: i32,
    pub total_tokens_used: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 9)))")]
    pub total_cost: Decimal,
    pub last_message_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

impl Model {
    /// Key the checkpointer uses for this conversation.
    pub fn thread_id(&self) -> String {
        self.id.to_string()
    }
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
    #[sea_orm(has_many = "super::message_feedback::Entity")]
    MessageFeedback,
    #[sea_orm(has_many = "super::user_document::Entity")]
    UserDocument,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::token_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TokenUsage.def()
    }
}

impl Related<super::message_feedback::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MessageFeedback.def()
    }
}

impl Related<super::user_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserDocument.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

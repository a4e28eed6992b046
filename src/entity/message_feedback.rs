//! Ratings of individual assistant turns.
//!
//! A turn is addressed by the checkpoint id and its message index; the text
//! itself stays in the checkpointer, only a short preview is kept here.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::FeedbackCategories;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    #[sea_orm(string_value = "thumbs_up")]
    ThumbsUp,
    #[sea_orm(string_value = "thumbs_down")]
    ThumbsDown,
    #[sea_orm(string_value = "excellent")]
    Excellent,
    #[sea_orm(string_value = "good")]
    Good,
    #[sea_orm(string_value = "neutral")]
    Neutral,
    #[sea_orm(string_value = "poor")]
    Poor,
    #[sea_orm(string_value = "very_poor")]
    VeryPoor,
}

impl Rating {
    pub fn is_positive(self) -> bool {
        matches!(self, Self::ThumbsUp | Self::Excellent | Self::Good)
    }

    pub fn is_negative(self) -> bool {
        matches!(self, Self::ThumbsDown | Self::Poor | Self::VeryPoor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ReportedIssue {
    #[sea_orm(string_value = "incorrect")]
    Incorrect,
    #[sea_orm(string_value = "harmful")]
    Harmful,
    #[sea_orm(string_value = "biased")]
    Biased,
    #[sea_orm(string_value = "off_topic")]
    OffTopic,
    #[sea_orm(string_value = "incomplete")]
    Incomplete,
    #[sea_orm(string_value = "technical_error")]
    TechnicalError,
    #[sea_orm(string_value = "other")]
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    #[sea_orm(string_value = "none")]
    #[serde(rename = "none")]
    NoAction,
    #[sea_orm(string_value = "noted")]
    Noted,
    #[sea_orm(string_value = "fixed")]
    Fixed,
    #[sea_orm(string_value = "escalated")]
    Escalated,
    #[sea_orm(string_value = "user_notified")]
    UserNotified,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message_feedback")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    #[sea_orm(indexed)]
    pub chat_session_id: Uuid,
    pub checkpoint_id: String,
    pub message_index: i32,
    pub rating: Rating,
    #[sea_orm(column_type = "Json")]
    pub feedback_categories: FeedbackCategories,
    #[sea_orm(column_type = "Text", nullable)]
    pub feedback_text: Option<String>,
    pub reported_issue: Option<ReportedIssue>,
    #[sea_orm(column_type = "Text", nullable)]
    pub message_preview: Option<String>,
    pub model_used: Option<String>,
    pub reviewed: bool,
    pub reviewed_at: Option<ChronoDateTimeUtc>,
    pub reviewed_by: Option<Uuid>,
    #[sea_orm(column_type = "Text", nullable)]
    pub admin_notes: Option<String>,
    pub action_taken: Option<ReviewAction>,
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
    #[sea_orm(
        belongs_to = "super::chat_session::Entity",
        from = "Column::ChatSessionId",
        to = "super::chat_session::Column::Id",
        on_delete = "Cascade"
    )]
    ChatSession,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ReviewedBy",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    Reviewer,
}

impl Related<super::chat_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect,
    Select, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{owned_session, MetadataStore};
use crate::entity::message_feedback::{
    self, Entity as MessageFeedbackEntity, Rating, ReportedIssue, ReviewAction,
};
use crate::error::{Result, StoreError};
use crate::types::FeedbackCategories;

const MAX_PREVIEW_CHARS: usize = 500;

/// A user's rating of one assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedback {
    pub chat_session_id: Uuid,
    pub checkpoint_id: String,
    pub message_index: i32,
    pub rating: Rating,
    #[serde(default)]
    pub categories: FeedbackCategories,
    pub feedback_text: Option<String>,
    pub reported_issue: Option<ReportedIssue>,
    /// Truncated to 500 characters.
    pub message_preview: Option<String>,
    pub model_used: Option<String>,
}

impl NewFeedback {
    pub fn new(
        chat_session_id: Uuid,
        checkpoint_id: impl Into<String>,
        message_index: i32,
        rating: Rating,
    ) -> Self {
        Self {
            chat_session_id,
            checkpoint_id: checkpoint_id.into(),
            message_index,
            rating,
            categories: FeedbackCategories::default(),
            feedback_text: None,
            reported_issue: None,
            message_preview: None,
            model_used: None,
        }
    }
}

/// Admin review of a feedback row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReview {
    pub reviewer_id: Uuid,
    pub action_taken: ReviewAction,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionStats {
    pub total: u64,
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
    /// Percentage of positive ratings, `0.0` without feedback.
    pub satisfaction_rate: f64,
}

impl SatisfactionStats {
    fn from_ratings(ratings: &[Rating]) -> Self {
        let total = ratings.len() as u64;
        let positive = ratings.iter().filter(|r| r.is_positive()).count() as u64;
        let negative = ratings.iter().filter(|r| r.is_negative()).count() as u64;
        let satisfaction_rate = if total == 0 {
            0.0
        } else {
            positive as f64 / total as f64 * 100.0
        };

        Self {
            total,
            positive,
            negative,
            neutral: total - positive - negative,
            satisfaction_rate,
        }
    }
}

impl MetadataStore {
    /// Stores a rating. A user rates a given turn at most once.
    pub async fn submit_feedback(&self, user_id: Uuid, new: NewFeedback) -> Result<message_feedback::Model> {
        if new.checkpoint_id.trim().is_empty() {
            return Err(StoreError::validation("checkpoint_id", "must not be empty"));
        }
        if new.message_index < 0 {
            return Err(StoreError::validation("message_index", "must not be negative"));
        }

        owned_session(&self.conn, user_id, new.chat_session_id).await?;

        let duplicate = MessageFeedbackEntity::find()
            .filter(message_feedback::Column::CheckpointId.eq(new.checkpoint_id.as_str()))
            .filter(message_feedback::Column::MessageIndex.eq(new.message_index))
            .filter(message_feedback::Column::UserId.eq(user_id))
            .one(&self.conn)
            .await?;
        if duplicate.is_some() {
            return Err(StoreError::Conflict(format!(
                "feedback for message {} of checkpoint {} already submitted",
                new.message_index, new.checkpoint_id
            )));
        }

        let now = Utc::now();
        let preview = new
            .message_preview
            .map(|p| p.chars().take(MAX_PREVIEW_CHARS).collect::<String>());

        let model = message_feedback::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            chat_session_id: Set(new.chat_session_id),
            checkpoint_id: Set(new.checkpoint_id),
            message_index: Set(new.message_index),
            rating: Set(new.rating),
            feedback_categories: Set(new.categories),
            feedback_text: Set(new.feedback_text),
            reported_issue: Set(new.reported_issue),
            message_preview: Set(preview),
            model_used: Set(new.model_used),
            reviewed: Set(false),
            reviewed_at: Set(None),
            reviewed_by: Set(None),
            admin_notes: Set(None),
            action_taken: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.conn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                StoreError::Conflict("feedback for this message already submitted".to_string())
            }
            _ => StoreError::Database(e),
        })?;

        info!(%user_id, session_id = %model.chat_session_id, rating = ?model.rating, "feedback submitted");
        Ok(model)
    }

    /// Marks feedback as reviewed. Not owner-scoped: this is an admin action.
    pub async fn review_feedback(&self, feedback_id: Uuid, review: FeedbackReview) -> Result<message_feedback::Model> {
        let feedback = MessageFeedbackEntity::find_by_id(feedback_id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("feedback", feedback_id))?;

        let now = Utc::now();
        let mut active = feedback.into_active_model();
        active.reviewed = Set(true);
        active.reviewed_at = Set(Some(now));
        active.reviewed_by = Set(Some(review.reviewer_id));
        active.action_taken = Set(Some(review.action_taken));
        if let Some(notes) = review.admin_notes.filter(|n| !n.trim().is_empty()) {
            active.admin_notes = Set(Some(notes));
        }
        active.updated_at = Set(now);

        let feedback = active.update(&self.conn).await?;
        info!(%feedback_id, reviewer = %review.reviewer_id, "feedback reviewed");
        Ok(feedback)
    }

    /// Feedback on a session, oldest first.
    pub async fn session_feedback(&self, user_id: Uuid, session_id: Uuid) -> Result<Vec<message_feedback::Model>> {
        owned_session(&self.conn, user_id, session_id).await?;
        Ok(MessageFeedbackEntity::find()
            .filter(message_feedback::Column::ChatSessionId.eq(session_id))
            .order_by_asc(message_feedback::Column::CreatedAt)
            .all(&self.conn)
            .await?)
    }

    /// Unreviewed feedback across all users, oldest first.
    pub async fn pending_feedback(&self, limit: u64) -> Result<Vec<message_feedback::Model>> {
        Ok(MessageFeedbackEntity::find()
            .filter(message_feedback::Column::Reviewed.eq(false))
            .order_by_asc(message_feedback::Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await?)
    }

    /// Thumbs and star ratings for one session.
    pub async fn session_satisfaction(&self, user_id: Uuid, session_id: Uuid) -> Result<SatisfactionStats> {
        owned_session(&self.conn, user_id, session_id).await?;
        self.satisfaction(
            MessageFeedbackEntity::find().filter(message_feedback::Column::ChatSessionId.eq(session_id)),
        )
        .await
    }

    /// Satisfaction across every rating the user gave.
    pub async fn user_satisfaction(&self, user_id: Uuid) -> Result<SatisfactionStats> {
        self.satisfaction(MessageFeedbackEntity::find().filter(message_feedback::Column::UserId.eq(user_id)))
            .await
    }

    async fn satisfaction(&self, query: Select<MessageFeedbackEntity>) -> Result<SatisfactionStats> {
        let ratings: Vec<Rating> = query
            .select_only()
            .column(message_feedback::Column::Rating)
            .into_tuple()
            .all(&self.conn)
            .await?;
        Ok(SatisfactionStats::from_ratings(&ratings))
    }
}

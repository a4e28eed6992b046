//! Uploaded document records and their vector-store processing state.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{SearchAttributes, Tags, VectorStoreIds};

/// Linear processing lifecycle: `Pending` → `Processing` → `Completed` | `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    pub chat_session_id: Option<Uuid>,
    pub file_name: String,
    pub file_type: String,
    pub file_extension: String,
    pub file_size: i64,
    pub storage_path: Option<String>,
    pub processing_status: ProcessingStatus,
    pub processed_at: Option<ChronoDateTimeUtc>,
    #[sea_orm(indexed)]
    pub vector_collection_name: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub vector_store_ids: VectorStoreIds,
    pub chunk_count: i32,
    pub title: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub tags: Tags,
    #[sea_orm(column_type = "Json")]
    pub vector_metadata: SearchAttributes,
    pub page_count: Option<i32>,
    pub word_count: Option<i32>,
    pub is_active: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub processing_error: Option<String>,
    pub retry_count: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

impl Model {
    /// True once chunks have been written to a collection.
    pub fn has_embeddings(&self) -> bool {
        self.processing_status == ProcessingStatus::Completed
            && self.vector_collection_name.is_some()
            && !self.vector_store_ids.is_empty()
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
    #[sea_orm(
        belongs_to = "super::chat_session::Entity",
        from = "Column::ChatSessionId",
        to = "super::chat_session::Column::Id",
        on_delete = "Cascade"
    )]
    ChatSession,
}

impl Related<super::chat_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

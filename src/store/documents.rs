use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::Alias;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{owned_session, MetadataStore};
use crate::entity::user_document::{self, Entity as UserDocumentEntity, ProcessingStatus};
use crate::error::{Result, StoreError};
use crate::types::{SearchAttributes, Tags, VectorMetadata, VectorStoreIds};

/// MIME types the processing pipeline can extract text from.
pub const SUPPORTED_FILE_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
    "text/plain",
    "text/markdown",
    "text/csv",
];

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Metadata of an uploaded file. The file itself lives outside the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub chat_session_id: Option<Uuid>,
    pub storage_path: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

/// Outcome reported by the ingestion worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub collection_name: String,
    pub vector_ids: Vec<String>,
    pub chunk_count: i32,
    pub page_count: Option<i32>,
    pub word_count: Option<i32>,
    #[serde(default)]
    pub attributes: SearchAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub total_size_bytes: i64,
    /// Rounded to two decimals.
    pub total_size_mb: f64,
    pub total_documents: u64,
    pub total_chunks: i64,
}

/// Collection holding every chunk of a user's documents.
pub fn user_collection_name(user_id: Uuid) -> String {
    format!("user_{user_id}_documents")
}

/// Collection holding the context documents of one session.
pub fn session_collection_name(session_id: Uuid) -> String {
    format!("session_{session_id}_context")
}

/// Lowercased text after the last dot, empty when there is none.
fn file_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

fn round_mb(bytes: i64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

impl MetadataStore {
    /// Checks an upload before anything is stored.
    pub fn validate_upload(&self, file_name: &str, file_type: &str, file_size: u64) -> Result<()> {
        if file_name.trim().is_empty() {
            return Err(StoreError::validation("file_name", "file name is required"));
        }
        if !SUPPORTED_FILE_TYPES.contains(&file_type) {
            return Err(StoreError::validation(
                "file_type",
                format!("unsupported file type: {file_type}"),
            ));
        }
        if file_size > self.max_upload_bytes {
            return Err(StoreError::validation(
                "file_size",
                format!(
                    "file too large: {:.2}MB, maximum {:.2}MB",
                    file_size as f64 / BYTES_PER_MB,
                    self.max_upload_bytes as f64 / BYTES_PER_MB
                ),
            ));
        }
        Ok(())
    }

    /// Stores a pending document record.
    pub async fn create_document(&self, user_id: Uuid, new: NewDocument) -> Result<user_document::Model> {
        self.validate_upload(&new.file_name, &new.file_type, new.file_size)?;
        let file_size = i64::try_from(new.file_size)
            .map_err(|_| StoreError::validation("file_size", "out of range"))?;

        if let Some(session_id) = new.chat_session_id {
            owned_session(&self.conn, user_id, session_id).await?;
        }

        let now = Utc::now();
        let model = user_document::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            chat_session_id: Set(new.chat_session_id),
            file_extension: Set(file_extension(&new.file_name)),
            file_name: Set(new.file_name),
            file_type: Set(new.file_type),
            file_size: Set(file_size),
            storage_path: Set(new.storage_path),
            processing_status: Set(ProcessingStatus::Pending),
            processed_at: Set(None),
            vector_collection_name: Set(None),
            vector_store_ids: Set(VectorStoreIds::default()),
            chunk_count: Set(0),
            title: Set(new.title),
            description: Set(new.description),
            tags: Set(new.tags),
            vector_metadata: Set(SearchAttributes::default()),
            page_count: Set(None),
            word_count: Set(None),
            is_active: Set(true),
            processing_error: Set(None),
            retry_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.conn)
        .await?;

        info!(%user_id, document_id = %model.id, file_type = %model.file_type, size = model.file_size, "document created");
        Ok(model)
    }

    /// Looks up a document owned by the user.
    pub async fn get_document(&self, user_id: Uuid, document_id: Uuid) -> Result<user_document::Model> {
        UserDocumentEntity::find_by_id(document_id)
            .one(&self.conn)
            .await?
            .filter(|doc| doc.user_id == user_id)
            .ok_or_else(|| StoreError::not_found("document", document_id))
    }

    /// Active documents, newest first, optionally limited to one session.
    pub async fn list_documents(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<Vec<user_document::Model>> {
        let mut query = UserDocumentEntity::find()
            .filter(user_document::Column::UserId.eq(user_id))
            .filter(user_document::Column::IsActive.eq(true));
        if let Some(session_id) = session_id {
            query = query.filter(user_document::Column::ChatSessionId.eq(session_id));
        }
        Ok(query
            .order_by_desc(user_document::Column::CreatedAt)
            .all(&self.conn)
            .await?)
    }

    async fn find_document(&self, document_id: Uuid) -> Result<user_document::Model> {
        UserDocumentEntity::find_by_id(document_id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("document", document_id))
    }

    /// Called by the worker when it picks the document up. A completed
    /// document must have its embeddings cleared before it is processed again.
    pub async fn mark_processing_started(&self, document_id: Uuid) -> Result<user_document::Model> {
        let doc = self.find_document(document_id).await?;
        if doc.processing_status == ProcessingStatus::Completed {
            return Err(StoreError::Conflict(format!(
                "document {document_id} is already processed"
            )));
        }

        let mut active = doc.into_active_model();
        active.processing_status = Set(ProcessingStatus::Processing);
        active.processing_error = Set(None);
        active.updated_at = Set(Utc::now());
        let doc = active.update(&self.conn).await?;

        info!(%document_id, "document processing started");
        Ok(doc)
    }

    /// Stores the embedding result and moves the document to `Completed`.
    pub async fn mark_processing_completed(
        &self,
        document_id: Uuid,
        result: ProcessingResult,
    ) -> Result<user_document::Model> {
        if result.collection_name.trim().is_empty() {
            return Err(StoreError::validation("collection_name", "must not be empty"));
        }
        if result.chunk_count < 0 {
            return Err(StoreError::validation("chunk_count", "must not be negative"));
        }

        let doc = self.find_document(document_id).await?;
        let mut attributes = doc.vector_metadata.clone();
        attributes.merge(result.attributes);

        let now = Utc::now();
        let mut active = doc.into_active_model();
        active.processing_status = Set(ProcessingStatus::Completed);
        active.processed_at = Set(Some(now));
        active.vector_collection_name = Set(Some(result.collection_name));
        active.vector_store_ids = Set(VectorStoreIds::new(result.vector_ids));
        active.chunk_count = Set(result.chunk_count);
        active.vector_metadata = Set(attributes);
        if result.page_count.is_some() {
            active.page_count = Set(result.page_count);
        }
        if result.word_count.is_some() {
            active.word_count = Set(result.word_count);
        }
        active.processing_error = Set(None);
        active.updated_at = Set(now);
        let doc = active.update(&self.conn).await?;

        info!(%document_id, chunks = doc.chunk_count, collection = ?doc.vector_collection_name, "document processed");
        Ok(doc)
    }

    /// Records the failure and bumps the retry counter.
    pub async fn mark_processing_failed(&self, document_id: Uuid, error: &str) -> Result<user_document::Model> {
        let doc = self.find_document(document_id).await?;
        let retry_count = doc.retry_count + 1;

        let mut active = doc.into_active_model();
        active.processing_status = Set(ProcessingStatus::Failed);
        active.processing_error = Set(Some(error.to_string()));
        active.retry_count = Set(retry_count);
        active.updated_at = Set(Utc::now());
        let doc = active.update(&self.conn).await?;

        warn!(%document_id, retry_count, error, "document processing failed");
        Ok(doc)
    }

    /// Metadata attached to every chunk of the document in the vector store.
    pub async fn vector_metadata(&self, user_id: Uuid, document_id: Uuid) -> Result<VectorMetadata> {
        let doc = self.get_document(user_id, document_id).await?;
        Ok(doc.to_vector_metadata())
    }

    /// Whether the document has vectors in the vector store.
    pub async fn has_embeddings(&self, user_id: Uuid, document_id: Uuid) -> Result<bool> {
        Ok(self.get_document(user_id, document_id).await?.has_embeddings())
    }

    /// Forgets the vector-store state and returns the document to `Pending`.
    /// Returns the ids the caller must delete from the collection.
    pub async fn clear_embeddings(&self, user_id: Uuid, document_id: Uuid) -> Result<VectorStoreIds> {
        let doc = self.get_document(user_id, document_id).await?;
        let ids = doc.vector_store_ids.clone();

        let mut active = doc.into_active_model();
        active.processing_status = Set(ProcessingStatus::Pending);
        active.processed_at = Set(None);
        active.vector_collection_name = Set(None);
        active.vector_store_ids = Set(VectorStoreIds::default());
        active.chunk_count = Set(0);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        info!(%document_id, removed = ids.len(), "embeddings cleared");
        Ok(ids)
    }

    /// Hides the document from listings and storage totals.
    pub async fn deactivate_document(&self, user_id: Uuid, document_id: Uuid) -> Result<()> {
        let doc = self.get_document(user_id, document_id).await?;
        let mut active = doc.into_active_model();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;
        info!(%user_id, %document_id, "document deactivated");
        Ok(())
    }

    /// Completed documents stored in `collection_name`.
    pub async fn documents_in_collection(
        &self,
        collection_name: &str,
        user_id: Option<Uuid>,
    ) -> Result<Vec<user_document::Model>> {
        let mut query = UserDocumentEntity::find()
            .filter(user_document::Column::VectorCollectionName.eq(collection_name))
            .filter(user_document::Column::ProcessingStatus.eq(ProcessingStatus::Completed));
        if let Some(user_id) = user_id {
            query = query.filter(user_document::Column::UserId.eq(user_id));
        }
        Ok(query
            .order_by_asc(user_document::Column::CreatedAt)
            .all(&self.conn)
            .await?)
    }

    /// Totals over the user's active documents.
    pub async fn storage_usage(&self, user_id: Uuid) -> Result<StorageUsage> {
        let active_docs = || {
            UserDocumentEntity::find()
                .filter(user_document::Column::UserId.eq(user_id))
                .filter(user_document::Column::IsActive.eq(true))
        };

        let total_documents = active_docs().count(&self.conn).await?;
        let (size, chunks): (Option<i64>, Option<i64>) = active_docs()
            .select_only()
            .column_as(
                Expr::col(user_document::Column::FileSize).sum().cast_as(Alias::new("bigint")),
                "total_size",
            )
            .column_as(
                Expr::col(user_document::Column::ChunkCount).sum().cast_as(Alias::new("bigint")),
                "total_chunks",
            )
            .into_tuple()
            .one(&self.conn)
            .await?
            .unwrap_or((None, None));

        let total_size_bytes = size.unwrap_or(0);
        Ok(StorageUsage {
            total_size_bytes,
            total_size_mb: round_mb(total_size_bytes),
            total_documents,
            total_chunks: chunks.unwrap_or(0),
        })
    }
}

impl user_document::Model {
    /// Reserved fields first; custom attributes can never shadow them.
    pub fn to_vector_metadata(&self) -> VectorMetadata {
        VectorMetadata {
            user_id: self.user_id,
            document_id: self.id,
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            upload_date: self.created_at,
            tags: self.tags.as_slice().to_vec(),
            session_id: self.chat_session_id,
            attributes: self
                .vector_metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Report.PDF"), "pdf");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("README"), "");
        assert_eq!(file_extension(".env"), "");
    }

    #[test]
    fn collection_names() {
        let id = Uuid::nil();
        assert_eq!(
            user_collection_name(id),
            "user_00000000-0000-0000-0000-000000000000_documents"
        );
        assert_eq!(
            session_collection_name(id),
            "session_00000000-0000-0000-0000-000000000000_context"
        );
    }

    #[test]
    fn megabytes_round_to_two_places() {
        assert_eq!(round_mb(0), 0.0);
        assert_eq!(round_mb(1024 * 1024), 1.0);
        assert_eq!(round_mb(1_500_000), 1.43);
    }
}

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set};
use tracing::info;
use uuid::Uuid;

use super::MetadataStore;
use crate::entity::chat_session::{self, Entity as ChatSessionEntity};
use crate::entity::user::{self, Entity as UserEntity};
use crate::error::{Result, StoreError};

impl MetadataStore {
    /// Registers an account. Emails are unique, compared case-insensitively.
    pub async fn create_user(&self, email: &str, display_name: Option<&str>) -> Result<user::Model> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(StoreError::validation("email", "must be an email address"));
        }

        let taken = UserEntity::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .one(&self.conn)
            .await?
            .is_some();
        if taken {
            return Err(StoreError::Conflict(format!("user {email} already exists")));
        }

        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            display_name: Set(display_name.map(str::to_string)),
            created_at: Set(Utc::now()),
        }
        .insert(&self.conn)
        .await?;

        info!(user_id = %model.id, "user created");
        Ok(model)
    }

    /// Looks up a user by id.
    pub async fn get_user(&self, user_id: Uuid) -> Result<user::Model> {
        UserEntity::find_by_id(user_id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("user", user_id))
    }

    /// Removes the account and, through foreign keys, everything it owns.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        let session_ids: Vec<Uuid> = ChatSessionEntity::find()
            .select_only()
            .column(chat_session::Column::Id)
            .filter(chat_session::Column::UserId.eq(user_id))
            .into_tuple()
            .all(&self.conn)
            .await?;

        let result = UserEntity::delete_by_id(user_id).exec(&self.conn).await?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        self.cache_invalidate(&crate::cache::preference_key(user_id)).await;
        for session_id in session_ids {
            self.cache_invalidate(&crate::cache::session_key(session_id)).await;
        }
        info!(%user_id, "user deleted");
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::NullOrdering;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, Order, QueryFilter, QueryOrder, Set,
    SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::MetadataStore;
use crate::crypto::key_prefix;
use crate::entity::user_api_key::{self, Entity as UserApiKeyEntity, Provider};
use crate::error::{Result, StoreError};

/// Checks a credential against its provider, e.g. by listing models.
///
/// The store never talks to providers itself; callers inject an
/// implementation into [`MetadataStore::validate_api_key`].
#[async_trait]
pub trait KeyValidator: Send + Sync {
    /// `Err` carries the provider's reason for rejecting the key.
    async fn validate(&self, provider: &Provider, secret: &str) -> std::result::Result<(), String>;
}

#[derive(Clone, Serialize, Deserialize)]
pub struct NewApiKey {
    pub provider: Provider,
    pub key_name: String,
    /// Plaintext secret. Encrypted before it reaches the database.
    pub secret: String,
    #[serde(default)]
    pub is_default: bool,
    pub daily_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
}

impl std::fmt::Debug for NewApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewApiKey")
            .field("provider", &self.provider)
            .field("key_name", &self.key_name)
            .field("secret", &"<redacted>")
            .field("is_default", &self.is_default)
            .field("daily_limit", &self.daily_limit)
            .field("monthly_limit", &self.monthly_limit)
            .finish()
    }
}

impl NewApiKey {
    pub fn new(provider: Provider, key_name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            provider,
            key_name: key_name.into(),
            secret: secret.into(),
            is_default: false,
            daily_limit: None,
            monthly_limit: None,
        }
    }
}

fn check_key_limit(field: &'static str, limit: Option<i32>) -> Result<()> {
    if limit.is_some_and(|l| l <= 0) {
        return Err(StoreError::validation(field, "must be positive"));
    }
    Ok(())
}

impl MetadataStore {
    async fn owned_key(&self, user_id: Uuid, key_id: Uuid) -> Result<user_api_key::Model> {
        UserApiKeyEntity::find_by_id(key_id)
            .one(&self.conn)
            .await?
            .filter(|key| key.user_id == user_id)
            .ok_or_else(|| StoreError::not_found("api key", key_id))
    }

    /// Encrypts and stores a provider key. A new default replaces the
    /// previous default of the same provider.
    pub async fn create_api_key(&self, user_id: Uuid, new: NewApiKey) -> Result<user_api_key::Model> {
        if new.key_name.trim().is_empty() {
            return Err(StoreError::validation("key_name", "must not be empty"));
        }
        if new.secret.trim().is_empty() {
            return Err(StoreError::validation("secret", "must not be empty"));
        }
        check_key_limit("daily_limit", new.daily_limit)?;
        check_key_limit("monthly_limit", new.monthly_limit)?;

        let encrypted = self.cipher()?.encrypt(&new.secret)?;
        let prefix = key_prefix(&new.secret);

        let now = Utc::now();
        let txn = self.conn.begin().await?;
        if new.is_default {
            UserApiKeyEntity::update_many()
                .col_expr(user_api_key::Column::IsDefault, Expr::value(false))
                .filter(user_api_key::Column::UserId.eq(user_id))
                .filter(user_api_key::Column::Provider.eq(new.provider.clone()))
                .exec(&txn)
                .await?;
        }

        let key = user_api_key::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider_display_name: Set(new.provider.display_name().to_string()),
            provider: Set(new.provider),
            encrypted_key: Set(encrypted),
            key_name: Set(new.key_name),
            key_prefix: Set(prefix),
            is_active: Set(true),
            is_default: Set(new.is_default),
            is_validated: Set(false),
            last_validated_at: Set(None),
            validation_error: Set(None),
            usage_count: Set(0),
            total_tokens_used: Set(0),
            last_used_at: Set(None),
            daily_limit: Set(new.daily_limit),
            monthly_limit: Set(new.monthly_limit),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                StoreError::Conflict("an api key with this name already exists".to_string())
            }
            _ => StoreError::Database(e),
        })?;
        txn.commit().await?;

        info!(%user_id, key_id = %key.id, provider = ?key.provider, prefix = %key.key_prefix, "api key stored");
        Ok(key)
    }

    /// Keys of the user, defaults first, then most recently used.
    pub async fn list_api_keys(&self, user_id: Uuid, provider: Option<Provider>) -> Result<Vec<user_api_key::Model>> {
        let mut query = UserApiKeyEntity::find().filter(user_api_key::Column::UserId.eq(user_id));
        if let Some(provider) = provider {
            query = query.filter(user_api_key::Column::Provider.eq(provider));
        }
        Ok(query
            .order_by_desc(user_api_key::Column::IsDefault)
            .order_by_with_nulls(user_api_key::Column::LastUsedAt, Order::Desc, NullOrdering::Last)
            .order_by_asc(user_api_key::Column::KeyName)
            .all(&self.conn)
            .await?)
    }

    /// Deletes one of the user's keys.
    pub async fn delete_api_key(&self, user_id: Uuid, key_id: Uuid) -> Result<()> {
        let result = UserApiKeyEntity::delete_many()
            .filter(user_api_key::Column::Id.eq(key_id))
            .filter(user_api_key::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found("api key", key_id));
        }
        info!(%user_id, %key_id, "api key deleted");
        Ok(())
    }

    /// Makes the key the default for its provider, clearing the previous default.
    pub async fn set_default_key(&self, user_id: Uuid, key_id: Uuid) -> Result<user_api_key::Model> {
        let key = self.owned_key(user_id, key_id).await?;

        let txn = self.conn.begin().await?;
        UserApiKeyEntity::update_many()
            .col_expr(user_api_key::Column::IsDefault, Expr::value(false))
            .filter(user_api_key::Column::UserId.eq(user_id))
            .filter(user_api_key::Column::Provider.eq(key.provider.clone()))
            .exec(&txn)
            .await?;

        let mut active = key.into_active_model();
        active.is_default = Set(true);
        active.updated_at = Set(Utc::now());
        let key = active.update(&txn).await?;
        txn.commit().await?;

        info!(%user_id, %key_id, "default api key changed");
        Ok(key)
    }

    /// Replaces the secret. The key must be validated again afterwards.
    pub async fn rotate_api_key(&self, user_id: Uuid, key_id: Uuid, secret: &str) -> Result<user_api_key::Model> {
        if secret.trim().is_empty() {
            return Err(StoreError::validation("secret", "must not be empty"));
        }
        let encrypted = self.cipher()?.encrypt(secret)?;
        let key = self.owned_key(user_id, key_id).await?;

        let mut active = key.into_active_model();
        active.encrypted_key = Set(encrypted);
        active.key_prefix = Set(key_prefix(secret));
        active.is_validated = Set(false);
        active.last_validated_at = Set(None);
        active.validation_error = Set(None);
        active.updated_at = Set(Utc::now());
        let key = active.update(&self.conn).await?;

        info!(%user_id, %key_id, prefix = %key.key_prefix, "api key rotated");
        Ok(key)
    }

    /// The provider's default key, or any active key of that provider.
    pub async fn default_key(&self, user_id: Uuid, provider: Provider) -> Result<Option<user_api_key::Model>> {
        Ok(UserApiKeyEntity::find()
            .filter(user_api_key::Column::UserId.eq(user_id))
            .filter(user_api_key::Column::Provider.eq(provider))
            .filter(user_api_key::Column::IsActive.eq(true))
            .order_by_desc(user_api_key::Column::IsDefault)
            .order_by_asc(user_api_key::Column::CreatedAt)
            .one(&self.conn)
            .await?)
    }

    /// Plaintext of [`default_key`](Self::default_key).
    pub async fn decrypt_default_key(&self, user_id: Uuid, provider: Provider) -> Result<Option<String>> {
        let cipher = self.cipher()?;
        match self.default_key(user_id, provider).await? {
            Some(key) => Ok(Some(cipher.decrypt(&key.encrypted_key)?)),
            None => Ok(None),
        }
    }

    /// Asks `validator` whether the key works and stores the outcome.
    /// Returns the updated row; check `is_validated` and `validation_error`.
    pub async fn validate_api_key(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        validator: &dyn KeyValidator,
    ) -> Result<user_api_key::Model> {
        let key = self.owned_key(user_id, key_id).await?;
        let secret = self.cipher()?.decrypt(&key.encrypted_key)?;
        let outcome = validator.validate(&key.provider, &secret).await;

        let now = Utc::now();
        let mut active = key.into_active_model();
        match outcome {
            Ok(()) => {
                active.is_validated = Set(true);
                active.last_validated_at = Set(Some(now));
                active.validation_error = Set(None);
            }
            Err(reason) => {
                warn!(%user_id, %key_id, %reason, "api key rejected by provider");
                active.is_validated = Set(false);
                active.validation_error = Set(Some(reason));
            }
        }
        active.updated_at = Set(now);
        Ok(active.update(&self.conn).await?)
    }

    /// Counts a use of the key outside [`record_usage`](Self::record_usage).
    pub async fn record_key_usage(&self, user_id: Uuid, key_id: Uuid, tokens: i64) -> Result<()> {
        if tokens < 0 {
            return Err(StoreError::validation("tokens", "must not be negative"));
        }
        let result = UserApiKeyEntity::update_many()
            .col_expr(
                user_api_key::Column::UsageCount,
                Expr::col(user_api_key::Column::UsageCount).add(1),
            )
            .col_expr(
                user_api_key::Column::TotalTokensUsed,
                Expr::col(user_api_key::Column::TotalTokensUsed).add(tokens),
            )
            .col_expr(user_api_key::Column::LastUsedAt, Expr::value(Utc::now()))
            .filter(user_api_key::Column::Id.eq(key_id))
            .filter(user_api_key::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found("api key", key_id));
        }
        Ok(())
    }
}

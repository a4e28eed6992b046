//! Error types returned by the store.

use sea_orm::DbErr;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::limits::LimitExceeded;

/// Convenience alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Every failure a [`MetadataStore`](crate::MetadataStore) operation can report.
///
/// Quota and rate-limit *checks* never produce an error: they return a
/// structured decision. Only the atomic "check and record" operations surface
/// [`StoreError::LimitExceeded`], because in that case nothing was recorded.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying SeaORM operation failed.
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    /// The row does not exist or belongs to another user.
    #[error("{entity} {id} not found or access denied")]
    NotFound { entity: &'static str, id: String },

    /// Caller supplied data that violates an invariant of the store.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The write collides with an existing row.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An atomic check-and-record operation was refused.
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),

    /// Credential encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The cache backend failed on an operation that had to reach it.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the error means "no such row for this user".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

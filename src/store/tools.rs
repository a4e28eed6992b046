use chrono::{DateTime, Utc};
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::MetadataStore;
use crate::entity::available_tool::{self, Entity as AvailableToolEntity, ToolCategory};
use crate::entity::tool_invocation::{self, Entity as ToolInvocationEntity};
use crate::entity::user_tool::{self, Entity as UserToolEntity, RateLimitPeriod};
use crate::error::{Result, StoreError};
use crate::limits::{evaluate_rate_limit, Decision, LimitExceeded, RateLimitStatus};
use crate::types::{ConfigField, ConfigSchema, ToolConfiguration};

/// A tool offered to users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCatalogTool {
    /// Identifier used by the agent, e.g. `web_search`.
    pub tool_name: String,
    pub display_name: String,
    pub description: String,
    pub icon: Option<String>,
    pub category: ToolCategory,
    pub is_public: bool,
    pub requires_admin_approval: bool,
    #[serde(default)]
    pub config_schema: ConfigSchema,
    #[serde(default)]
    pub default_config: ToolConfiguration,
    pub default_rate_limit: Option<i32>,
    pub default_rate_limit_period: RateLimitPeriod,
}

impl NewCatalogTool {
    pub fn new(tool_name: impl Into<String>, display_name: impl Into<String>, category: ToolCategory) -> Self {
        Self {
            tool_name: tool_name.into(),
            display_name: display_name.into(),
            description: String::new(),
            icon: None,
            category,
            is_public: true,
            requires_admin_approval: false,
            config_schema: ConfigSchema::default(),
            default_config: ToolConfiguration::default(),
            default_rate_limit: None,
            default_rate_limit_period: RateLimitPeriod::Hour,
        }
    }
}

/// A recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUse {
    pub tool_name: String,
    pub usage_count: i32,
    pub invoked_at: DateTime<Utc>,
    /// Uses left in the current window, `None` without a limit.
    pub remaining: Option<i64>,
}

fn check_tool_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(StoreError::validation(
            "tool_name",
            "must be lowercase letters, digits or '_'",
        ));
    }
    Ok(())
}

fn check_rate_limit(limit: Option<i32>) -> Result<()> {
    if limit.is_some_and(|l| l <= 0) {
        return Err(StoreError::validation("rate_limit", "must be positive"));
    }
    Ok(())
}

/// Defaults may leave required keys to the user, but must not contain
/// unknown or wrongly typed ones.
fn check_defaults(schema: &ConfigSchema, defaults: &ToolConfiguration) -> Result<()> {
    let relaxed = ConfigSchema {
        fields: schema
            .fields
            .iter()
            .map(|(name, field)| {
                (
                    name.clone(),
                    ConfigField {
                        required: false,
                        ..field.clone()
                    },
                )
            })
            .collect(),
    };
    defaults
        .validate(&relaxed)
        .map_err(|reason| StoreError::validation("default_config", reason))
}

async fn find_user_tool<C>(db: &C, user_id: Uuid, tool_name: &str) -> Result<user_tool::Model>
where
    C: ConnectionTrait,
{
    UserToolEntity::find()
        .filter(user_tool::Column::UserId.eq(user_id))
        .filter(user_tool::Column::ToolName.eq(tool_name))
        .one(db)
        .await?
        .ok_or_else(|| StoreError::not_found("tool", tool_name))
}

/// Takes the user tool's row lock until the transaction ends, with a no-op
/// update so SQLite serializes writers too. `false` when the user has no
/// such tool.
async fn lock_user_tool(txn: &DatabaseTransaction, user_id: Uuid, tool_name: &str) -> Result<bool> {
    let locked = UserToolEntity::update_many()
        .col_expr(user_tool::Column::UsageCount, Expr::col(user_tool::Column::UsageCount).into())
        .filter(user_tool::Column::UserId.eq(user_id))
        .filter(user_tool::Column::ToolName.eq(tool_name))
        .exec(txn)
        .await?;
    Ok(locked.rows_affected > 0)
}

/// Rate-limit state of an existing user tool.
async fn rate_status<C>(db: &C, tool: &user_tool::Model, now: DateTime<Utc>) -> Result<RateLimitStatus>
where
    C: ConnectionTrait,
{
    if !tool.is_enabled {
        return Ok(RateLimitStatus::denied(LimitExceeded::ToolNotEnabled {
            tool: tool.tool_name.clone(),
        }));
    }
    if tool.requires_approval && !tool.is_approved {
        return Ok(RateLimitStatus::denied(LimitExceeded::ToolNotApproved {
            tool: tool.tool_name.clone(),
        }));
    }

    let Some(limit) = tool.rate_limit else {
        return Ok(RateLimitStatus::unlimited(0));
    };
    let since = now - tool.rate_limit_period.window();
    let uses = ToolInvocationEntity::find()
        .filter(tool_invocation::Column::UserToolId.eq(tool.id))
        .filter(tool_invocation::Column::InvokedAt.gte(since))
        .count(db)
        .await?;
    let uses = i64::try_from(uses).unwrap_or(i64::MAX);

    Ok(evaluate_rate_limit(
        &tool.tool_name,
        Some(i64::from(limit)),
        tool.rate_limit_period,
        uses,
        now,
    ))
}

async fn insert_invocation<C>(
    db: &C,
    tool: &user_tool::Model,
    status: &RateLimitStatus,
    now: DateTime<Utc>,
) -> Result<ToolUse>
where
    C: ConnectionTrait,
{
    tool_invocation::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_tool_id: Set(tool.id),
        user_id: Set(tool.user_id),
        invoked_at: Set(now),
    }
    .insert(db)
    .await?;

    UserToolEntity::update_many()
        .col_expr(
            user_tool::Column::UsageCount,
            Expr::col(user_tool::Column::UsageCount).add(1),
        )
        .col_expr(user_tool::Column::LastUsedAt, Expr::value(now))
        .filter(user_tool::Column::Id.eq(tool.id))
        .exec(db)
        .await?;

    Ok(ToolUse {
        tool_name: tool.tool_name.clone(),
        usage_count: tool.usage_count + 1,
        invoked_at: now,
        remaining: status.remaining.map(|r| (r - 1).max(0)),
    })
}

/// Adjusts the catalog's user count, never below zero.
async fn adjust_total_users<C>(db: &C, tool_id: Uuid, delta: i32) -> Result<()>
where
    C: ConnectionTrait,
{
    let mut update = AvailableToolEntity::update_many()
        .col_expr(
            available_tool::Column::TotalUsers,
            Expr::col(available_tool::Column::TotalUsers).add(delta),
        )
        .filter(available_tool::Column::Id.eq(tool_id));
    if delta < 0 {
        update = update.filter(available_tool::Column::TotalUsers.gte(-delta));
    }
    update.exec(db).await?;
    Ok(())
}

impl MetadataStore {
    /// Adds a tool to the catalog.
    pub async fn register_tool(&self, new: NewCatalogTool) -> Result<available_tool::Model> {
        check_tool_name(&new.tool_name)?;
        check_rate_limit(new.default_rate_limit)?;
        check_defaults(&new.config_schema, &new.default_config)?;

        let now = Utc::now();
        let tool = available_tool::ActiveModel {
            id: Set(Uuid::new_v4()),
            tool_name: Set(new.tool_name),
            display_name: Set(new.display_name),
            description: Set(new.description),
            icon: Set(new.icon),
            category: Set(new.category),
            is_active: Set(true),
            is_public: Set(new.is_public),
            requires_admin_approval: Set(new.requires_admin_approval),
            config_schema: Set(new.config_schema),
            default_config: Set(new.default_config),
            default_rate_limit: Set(new.default_rate_limit),
            default_rate_limit_period: Set(new.default_rate_limit_period),
            total_users: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.conn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                StoreError::Conflict("tool already registered".to_string())
            }
            _ => StoreError::Database(e),
        })?;

        info!(tool = %tool.tool_name, "tool registered");
        Ok(tool)
    }

    /// Active public tools, by category then name.
    pub async fn list_catalog(&self) -> Result<Vec<available_tool::Model>> {
        Ok(AvailableToolEntity::find()
            .filter(available_tool::Column::IsActive.eq(true))
            .filter(available_tool::Column::IsPublic.eq(true))
            .order_by_asc(available_tool::Column::Category)
            .order_by_asc(available_tool::Column::DisplayName)
            .all(&self.conn)
            .await?)
    }

    /// Enables a catalog tool for the user.
    ///
    /// `configuration` is merged over the catalog defaults and validated
    /// against the catalog schema. Tools that require approval stay unusable
    /// until [`approve_tool`](Self::approve_tool) is called.
    pub async fn enable_tool(
        &self,
        user_id: Uuid,
        tool_name: &str,
        configuration: ToolConfiguration,
    ) -> Result<user_tool::Model> {
        let catalog = AvailableToolEntity::find()
            .filter(available_tool::Column::ToolName.eq(tool_name))
            .filter(available_tool::Column::IsActive.eq(true))
            .one(&self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("catalog tool", tool_name))?;

        let configuration = configuration.with_defaults(&catalog.default_config);
        configuration
            .validate(&catalog.config_schema)
            .map_err(|reason| StoreError::validation("configuration", reason))?;

        let now = Utc::now();
        let txn = self.conn.begin().await?;
        let existing = UserToolEntity::find()
            .filter(user_tool::Column::UserId.eq(user_id))
            .filter(user_tool::Column::AvailableToolId.eq(catalog.id))
            .one(&txn)
            .await?;

        let tool = match existing {
            Some(existing) => {
                let was_enabled = existing.is_enabled;
                let mut active = existing.into_active_model();
                active.is_enabled = Set(true);
                active.configuration = Set(configuration);
                active.updated_at = Set(now);
                let tool = active.update(&txn).await?;
                if !was_enabled {
                    adjust_total_users(&txn, catalog.id, 1).await?;
                }
                tool
            }
            None => {
                let tool = user_tool::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    available_tool_id: Set(catalog.id),
                    tool_name: Set(catalog.tool_name.clone()),
                    tool_display_name: Set(catalog.display_name.clone()),
                    is_enabled: Set(true),
                    configuration: Set(configuration),
                    category: Set(catalog.category.clone()),
                    usage_count: Set(0),
                    last_used_at: Set(None),
                    rate_limit: Set(catalog.default_rate_limit),
                    rate_limit_period: Set(catalog.default_rate_limit_period),
                    requires_approval: Set(catalog.requires_admin_approval),
                    is_approved: Set(!catalog.requires_admin_approval),
                    approved_by: Set(None),
                    approved_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
                adjust_total_users(&txn, catalog.id, 1).await?;
                tool
            }
        };
        txn.commit().await?;

        info!(%user_id, tool = %tool.tool_name, approved = tool.is_approved, "tool enabled");
        Ok(tool)
    }

    /// Disables the user's tool. Already disabled tools are returned unchanged.
    pub async fn disable_tool(&self, user_id: Uuid, tool_name: &str) -> Result<user_tool::Model> {
        let txn = self.conn.begin().await?;
        let tool = find_user_tool(&txn, user_id, tool_name).await?;
        if !tool.is_enabled {
            txn.commit().await?;
            return Ok(tool);
        }

        let catalog_id = tool.available_tool_id;
        let mut active = tool.into_active_model();
        active.is_enabled = Set(false);
        active.updated_at = Set(Utc::now());
        let tool = active.update(&txn).await?;
        adjust_total_users(&txn, catalog_id, -1).await?;
        txn.commit().await?;

        info!(%user_id, tool = %tool.tool_name, "tool disabled");
        Ok(tool)
    }

    /// Admin approval of a user's tool.
    pub async fn approve_tool(&self, user_tool_id: Uuid, admin_id: Uuid) -> Result<user_tool::Model> {
        let tool = UserToolEntity::find_by_id(user_tool_id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("tool", user_tool_id))?;

        let now = Utc::now();
        let mut active = tool.into_active_model();
        active.is_approved = Set(true);
        active.approved_by = Set(Some(admin_id));
        active.approved_at = Set(Some(now));
        active.updated_at = Set(now);
        let tool = active.update(&self.conn).await?;

        info!(%user_tool_id, %admin_id, tool = %tool.tool_name, "tool approved");
        Ok(tool)
    }

    /// Tools the user can call right now: enabled, and approved where needed.
    pub async fn user_tools(&self, user_id: Uuid) -> Result<Vec<user_tool::Model>> {
        Ok(UserToolEntity::find()
            .filter(user_tool::Column::UserId.eq(user_id))
            .filter(user_tool::Column::IsEnabled.eq(true))
            .filter(
                Condition::any()
                    .add(user_tool::Column::RequiresApproval.eq(false))
                    .add(user_tool::Column::IsApproved.eq(true)),
            )
            .order_by_asc(user_tool::Column::ToolName)
            .all(&self.conn)
            .await?)
    }

    /// The stored configuration of an enabled or disabled user tool.
    pub async fn tool_config(&self, user_id: Uuid, tool_name: &str) -> Result<ToolConfiguration> {
        Ok(find_user_tool(&self.conn, user_id, tool_name)
            .await?
            .configuration)
    }

    /// Overrides the catalog default. `None` removes the limit.
    pub async fn set_rate_limit(
        &self,
        user_id: Uuid,
        tool_name: &str,
        limit: Option<i32>,
        period: RateLimitPeriod,
    ) -> Result<user_tool::Model> {
        check_rate_limit(limit)?;
        let tool = find_user_tool(&self.conn, user_id, tool_name).await?;
        let mut active = tool.into_active_model();
        active.rate_limit = Set(limit);
        active.rate_limit_period = Set(period);
        active.updated_at = Set(Utc::now());
        let tool = active.update(&self.conn).await?;
        debug!(%user_id, tool = %tool.tool_name, ?limit, %period, "rate limit set");
        Ok(tool)
    }

    /// Advisory check. Use [`use_tool`](Self::use_tool) to check and record
    /// in one step.
    pub async fn check_tool_rate_limit(&self, user_id: Uuid, tool_name: &str) -> Result<RateLimitStatus> {
        match find_user_tool(&self.conn, user_id, tool_name).await {
            Ok(tool) => rate_status(&self.conn, &tool, Utc::now()).await,
            Err(e) if e.is_not_found() => Ok(RateLimitStatus::denied(LimitExceeded::ToolNotEnabled {
                tool: tool_name.to_string(),
            })),
            Err(e) => Err(e),
        }
    }

    /// Records a use without checking limits.
    pub async fn record_tool_use(&self, user_id: Uuid, tool_name: &str) -> Result<ToolUse> {
        let now = Utc::now();
        let tool = find_user_tool(&self.conn, user_id, tool_name).await?;
        let status = rate_status(&self.conn, &tool, now).await?;
        let used = insert_invocation(&self.conn, &tool, &status, now).await?;
        debug!(%user_id, tool = %used.tool_name, count = used.usage_count, "tool used");
        Ok(used)
    }

    /// Deletes invocation records older than `older_than`. Rate-limit windows
    /// never look back further than a day, so anything older is only history.
    pub async fn purge_tool_invocations(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = ToolInvocationEntity::delete_many()
            .filter(tool_invocation::Column::InvokedAt.lt(older_than))
            .exec(&self.conn)
            .await?;
        debug!(purged = result.rows_affected, %older_than, "tool invocations purged");
        Ok(result.rows_affected)
    }

    /// Checks the rate limit and records the use in one transaction.
    pub async fn use_tool(&self, user_id: Uuid, tool_name: &str) -> Result<ToolUse> {
        let now = Utc::now();
        let txn = self.conn.begin().await?;

        if !lock_user_tool(&txn, user_id, tool_name).await? {
            txn.rollback().await?;
            return Err(LimitExceeded::ToolNotEnabled {
                tool: tool_name.to_string(),
            }
            .into());
        }
        let tool = find_user_tool(&txn, user_id, tool_name).await?;

        let status = rate_status(&txn, &tool, now).await?;
        if let Decision::Denied(reason) = &status.decision {
            txn.rollback().await?;
            warn!(%user_id, tool = %tool.tool_name, %reason, "tool use refused");
            return Err(reason.clone().into());
        }

        let used = insert_invocation(&txn, &tool, &status, now).await?;
        txn.commit().await?;
        debug!(%user_id, tool = %used.tool_name, count = used.usage_count, "tool used");
        Ok(used)
    }
}

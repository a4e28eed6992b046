//! A user's enablement of a catalog tool, with its own configuration and
//! rate limit.

use std::fmt;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::ToolConfiguration;

use super::available_tool::ToolCategory;

/// Length of the trailing rate-limit window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPeriod {
    #[sea_orm(string_value = "minute")]
    Minute,
    #[sea_orm(string_value = "hour")]
    Hour,
    #[sea_orm(string_value = "day")]
    Day,
}

impl fmt::Display for RateLimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        })
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_tools")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    pub available_tool_id: Uuid,
    pub tool_name: String,
    pub tool_display_name: String,
    pub is_enabled: bool,
    #[sea_orm(column_type = "Json")]
    pub configuration: ToolConfiguration,
    pub category: ToolCategory,
    pub usage_count: i32,
    pub last_used_at: Option<ChronoDateTimeUtc>,
    pub rate_limit: Option<i32>,
    pub rate_limit_period: RateLimitPeriod,
    pub requires_approval: bool,
    pub is_approved: bool,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

impl Model {
    /// Enabled, and approved if approval is required.
    pub fn is_usable(&self) -> bool {
        self.is_enabled && (!self.requires_approval || self.is_approved)
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
        belongs_to = "super::available_tool::Entity",
        from = "Column::AvailableToolId",
        to = "super::available_tool::Column::Id",
        on_delete = "Cascade"
    )]
    AvailableTool,
    #[sea_orm(has_many = "super::tool_invocation::Entity")]
    ToolInvocation,
}

impl Related<super::available_tool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AvailableTool.def()
    }
}

impl Related<super::tool_invocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ToolInvocation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! Global tool catalog.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{ConfigSchema, ToolConfiguration};

use super::user_tool::RateLimitPeriod;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    #[sea_orm(string_value = "search")]
    Search,
    #[sea_orm(string_value = "code")]
    Code,
    #[sea_orm(string_value = "data")]
    Data,
    #[sea_orm(string_value = "integration")]
    Integration,
    #[sea_orm(string_value = "utility")]
    Utility,
    #[sea_orm(string_value = "custom")]
    Custom,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "available_tools")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub tool_name: String,
    pub display_name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub icon: Option<String>,
    pub category: ToolCategory,
    pub is_active: bool,
    pub is_public: bool,
    pub requires_admin_approval: bool,
    #[sea_orm(column_type = "Json")]
    pub config_schema: ConfigSchema,
    #[sea_orm(column_type = "Json")]
    pub default_config: ToolConfiguration,
    pub default_rate_limit: Option<i32>,
    pub default_rate_limit_period: RateLimitPeriod,
    pub total_users: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_tool::Entity")]
    UserTool,
}

impl Related<super::user_tool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserTool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

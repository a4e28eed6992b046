//! Timestamps of tool uses, counted by the rate limiter.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tool_invocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_tool_id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(indexed)]
    pub invoked_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user_tool::Entity",
        from = "Column::UserToolId",
        to = "super::user_tool::Column::Id",
        on_delete = "Cascade"
    )]
    UserTool,
}

impl Related<super::user_tool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserTool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

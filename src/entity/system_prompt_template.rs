//! Reusable system prompts with `{variable}` placeholders.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{PromptVariables, Tags};

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PromptCategory {
    #[sea_orm(string_value = "general")]
    General,
    #[sea_orm(string_value = "coding")]
    Coding,
    #[sea_orm(string_value = "writing")]
    Writing,
    #[sea_orm(string_value = "research")]
    Research,
    #[sea_orm(string_value = "education")]
    Education,
    #[sea_orm(string_value = "business")]
    Business,
    #[sea_orm(string_value = "creative")]
    Creative,
    #[sea_orm(string_value = "analysis")]
    Analysis,
    #[sea_orm(string_value = "custom")]
    Custom,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_prompt_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub category: PromptCategory,
    #[sea_orm(column_type = "Json")]
    pub tags: Tags,
    pub is_default: bool,
    pub is_active: bool,
    pub is_public: bool,
    #[sea_orm(column_type = "Json")]
    pub variables: PromptVariables,
    pub recommended_model: Option<String>,
    pub recommended_temperature: Option<f64>,
    pub usage_count: i32,
    pub rating_sum: i32,
    pub rating_count: i32,
    pub created_by: Option<Uuid>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

impl Model {
    /// Mean of all ratings rounded to two decimals, `0.0` when unrated.
    pub fn average_rating(&self) -> f64 {
        if self.rating_count == 0 {
            return 0.0;
        }
        let mean = f64::from(self.rating_sum) / f64::from(self.rating_count);
        (mean * 100.0).round() / 100.0
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::CreatedBy",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    Creator,
}

impl ActiveModelBehavior for ActiveModel {}

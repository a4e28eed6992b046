use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::preferences::check_temperature;
use super::MetadataStore;
use crate::entity::system_prompt_template::{self, Entity as PromptTemplateEntity, PromptCategory};
use crate::error::{Result, StoreError};
use crate::types::{PromptVariables, Tags};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPromptTemplate {
    pub name: String,
    /// Lowercase letters, digits, `-` and `_`.
    pub slug: String,
    pub content: String,
    pub category: PromptCategory,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub variables: PromptVariables,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_public: bool,
    pub recommended_model: Option<String>,
    pub recommended_temperature: Option<f64>,
    pub created_by: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

impl NewPromptTemplate {
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        content: impl Into<String>,
        category: PromptCategory,
    ) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            content: content.into(),
            category,
            description: None,
            tags: Tags::default(),
            variables: PromptVariables::default(),
            is_default: false,
            is_public: true,
            recommended_model: None,
            recommended_temperature: None,
            created_by: None,
        }
    }
}

fn check_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
        return Err(StoreError::validation(
            "slug",
            "must be lowercase letters, digits, '-' or '_'",
        ));
    }
    Ok(())
}

impl system_prompt_template::Model {
    /// Substitutes each `{name}` with its value. Unknown placeholders stay as they are.
    pub fn render(&self, values: &BTreeMap<String, String>) -> String {
        let mut prompt = self.content.clone();
        for (key, value) in values {
            prompt = prompt.replace(&format!("{{{key}}}"), value);
        }
        prompt
    }

    /// Like [`render`](Self::render) but fails if a declared variable has no value.
    pub fn render_strict(&self, values: &BTreeMap<String, String>) -> Result<String> {
        let missing: Vec<&str> = self
            .variables
            .as_slice()
            .iter()
            .filter(|name| !values.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::validation(
                "variables",
                format!("missing values for {}", missing.join(", ")),
            ));
        }
        Ok(self.render(values))
    }
}

impl MetadataStore {
    /// Adds a template. Marking it default clears the flag on every other template.
    pub async fn create_prompt_template(&self, new: NewPromptTemplate) -> Result<system_prompt_template::Model> {
        check_slug(&new.slug)?;
        if new.name.trim().is_empty() {
            return Err(StoreError::validation("name", "must not be empty"));
        }
        if new.content.trim().is_empty() {
            return Err(StoreError::validation("content", "must not be empty"));
        }
        if let Some(t) = new.recommended_temperature {
            check_temperature(t)?;
        }

        let taken = PromptTemplateEntity::find()
            .filter(system_prompt_template::Column::Slug.eq(new.slug.as_str()))
            .one(&self.conn)
            .await?
            .is_some();
        if taken {
            return Err(StoreError::Conflict(format!("prompt template '{}' already exists", new.slug)));
        }

        let txn = self.conn.begin().await?;
        if new.is_default {
            PromptTemplateEntity::update_many()
                .col_expr(system_prompt_template::Column::IsDefault, Expr::value(false))
                .filter(system_prompt_template::Column::IsDefault.eq(true))
                .exec(&txn)
                .await?;
        }

        let now = Utc::now();
        let template = system_prompt_template::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new.name),
            slug: Set(new.slug),
            description: Set(new.description),
            content: Set(new.content),
            category: Set(new.category),
            tags: Set(new.tags),
            is_default: Set(new.is_default),
            is_active: Set(true),
            is_public: Set(new.is_public),
            variables: Set(new.variables),
            recommended_model: Set(new.recommended_model),
            recommended_temperature: Set(new.recommended_temperature),
            usage_count: Set(0),
            rating_sum: Set(0),
            rating_count: Set(0),
            created_by: Set(new.created_by),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                StoreError::Conflict("prompt template slug already exists".to_string())
            }
            _ => StoreError::Database(e),
        })?;
        txn.commit().await?;

        info!(slug = %template.slug, default = template.is_default, "prompt template created");
        Ok(template)
    }

    /// Active template with the given slug.
    pub async fn prompt_template(&self, slug: &str) -> Result<system_prompt_template::Model> {
        PromptTemplateEntity::find()
            .filter(system_prompt_template::Column::Slug.eq(slug))
            .filter(system_prompt_template::Column::IsActive.eq(true))
            .one(&self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("prompt template", slug))
    }

    /// The active default template, if one is set.
    pub async fn default_prompt_template(&self) -> Result<Option<system_prompt_template::Model>> {
        Ok(PromptTemplateEntity::find()
            .filter(system_prompt_template::Column::IsDefault.eq(true))
            .filter(system_prompt_template::Column::IsActive.eq(true))
            .one(&self.conn)
            .await?)
    }

    /// Public templates, most used first.
    pub async fn public_prompt_templates(&self) -> Result<Vec<system_prompt_template::Model>> {
        Ok(PromptTemplateEntity::find()
            .filter(system_prompt_template::Column::IsPublic.eq(true))
            .filter(system_prompt_template::Column::IsActive.eq(true))
            .order_by_desc(system_prompt_template::Column::UsageCount)
            .order_by_asc(system_prompt_template::Column::Name)
            .all(&self.conn)
            .await?)
    }

    /// Active templates in a category, by name.
    pub async fn prompt_templates_by_category(
        &self,
        category: PromptCategory,
    ) -> Result<Vec<system_prompt_template::Model>> {
        Ok(PromptTemplateEntity::find()
            .filter(system_prompt_template::Column::Category.eq(category))
            .filter(system_prompt_template::Column::IsActive.eq(true))
            .order_by_asc(system_prompt_template::Column::Name)
            .all(&self.conn)
            .await?)
    }

    /// Counts one use of the template.
    pub async fn increment_prompt_usage(&self, template_id: Uuid) -> Result<()> {
        let result = PromptTemplateEntity::update_many()
            .col_expr(
                system_prompt_template::Column::UsageCount,
                Expr::col(system_prompt_template::Column::UsageCount).add(1),
            )
            .filter(system_prompt_template::Column::Id.eq(template_id))
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found("prompt template", template_id));
        }
        debug!(%template_id, "prompt template used");
        Ok(())
    }

    /// Adds a 1–5 star rating and returns the new average.
    pub async fn rate_prompt_template(&self, template_id: Uuid, rating: i32) -> Result<f64> {
        if !(1..=5).contains(&rating) {
            return Err(StoreError::validation("rating", "must be between 1 and 5"));
        }

        let result = PromptTemplateEntity::update_many()
            .col_expr(
                system_prompt_template::Column::RatingSum,
                Expr::col(system_prompt_template::Column::RatingSum).add(rating),
            )
            .col_expr(
                system_prompt_template::Column::RatingCount,
                Expr::col(system_prompt_template::Column::RatingCount).add(1),
            )
            .filter(system_prompt_template::Column::Id.eq(template_id))
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found("prompt template", template_id));
        }

        self.prompt_average_rating(template_id).await
    }

    /// Average star rating, rounded to two decimals. 0 when unrated.
    pub async fn prompt_average_rating(&self, template_id: Uuid) -> Result<f64> {
        PromptTemplateEntity::find_by_id(template_id)
            .one(&self.conn)
            .await?
            .map(|t| t.average_rating())
            .ok_or_else(|| StoreError::not_found("prompt template", template_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(content: &str, variables: &[&str]) -> system_prompt_template::Model {
        let now = Utc::now();
        system_prompt_template::Model {
            id: Uuid::new_v4(),
            name: "Tutor".to_string(),
            slug: "tutor".to_string(),
            description: None,
            content: content.to_string(),
            category: PromptCategory::Education,
            tags: Tags::default(),
            is_default: false,
            is_active: true,
            is_public: true,
            variables: PromptVariables::new(variables.iter().copied()).unwrap(),
            recommended_model: None,
            recommended_temperature: None,
            usage_count: 0,
            rating_sum: 0,
            rating_count: 0,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn render_replaces_known_placeholders() {
        let t = template("Teach {topic} to {user_name}. Keep {tone}.", &["topic", "user_name"]);
        let out = t.render(&values(&[("topic", "Rust"), ("user_name", "Sam")]));
        assert_eq!(out, "Teach Rust to Sam. Keep {tone}.");
    }

    #[test]
    fn strict_render_reports_missing_variables() {
        let t = template("Teach {topic} to {user_name}.", &["topic", "user_name"]);
        let err = t.render_strict(&values(&[("topic", "Rust")])).unwrap_err();
        assert!(err.to_string().contains("user_name"));
        assert!(t
            .render_strict(&values(&[("topic", "Rust"), ("user_name", "Sam")]))
            .is_ok());
    }

    #[test]
    fn slugs() {
        assert!(check_slug("code-review_v2").is_ok());
        assert!(check_slug("Code Review").is_err());
        assert!(check_slug("").is_err());
    }

    #[test]
    fn average_rating_is_rounded() {
        let mut t = template("x", &[]);
        assert_eq!(t.average_rating(), 0.0);
        t.rating_sum = 13;
        t.rating_count = 3;
        assert_eq!(t.average_rating(), 4.33);
    }
}

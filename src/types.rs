//! Structured JSON column types.
//!
//! Each JSON column has its own type so malformed data is rejected when it
//! enters the store instead of surfacing later as an untyped map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User-defined labels. Trimmed, de-duplicated, empty entries dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Tags(Vec<String>);

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Self::new(tags)
    }
}

impl From<Tags> for Vec<String> {
    fn from(tags: Tags) -> Self {
        tags.0
    }
}

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if !tag.is_empty() && !out.iter().any(|t| t == tag) {
                out.push(tag.to_string());
            }
        }
        Self(out)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }
}

/// What a piece of feedback is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    Helpful,
    Accurate,
    Creative,
    Clear,
    Incorrect,
    Incomplete,
    OffTopic,
    TooLong,
    TooShort,
    Unsafe,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct FeedbackCategories(Vec<FeedbackCategory>);

impl FeedbackCategories {
    pub fn new(categories: impl IntoIterator<Item = FeedbackCategory>) -> Self {
        let mut out = Vec::new();
        for category in categories {
            if !out.contains(&category) {
                out.push(category);
            }
        }
        Self(out)
    }

    pub fn as_slice(&self) -> &[FeedbackCategory] {
        &self.0
    }
}

/// Opaque chunk identifiers returned by the vector store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct VectorStoreIds(Vec<String>);

impl VectorStoreIds {
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Placeholder names a prompt template declares, without braces.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct PromptVariables(Vec<String>);

impl PromptVariables {
    pub fn new<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim().trim_start_matches('{').trim_end_matches('}');
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("'{name}' is not a valid variable name"));
            }
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
        Ok(Self(out))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Keys the store itself writes into [`VectorMetadata`].
pub const RESERVED_VECTOR_KEYS: &[&str] = &[
    "user_id",
    "document_id",
    "file_name",
    "file_type",
    "upload_date",
    "tags",
    "session_id",
];

/// Extra searchable attributes for vector filtering, e.g. `category=research`.
///
/// Keys that the store derives itself are rejected, so an attribute can never
/// overwrite ownership fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct SearchAttributes(BTreeMap<String, String>);

impl SearchAttributes {
    pub fn new<I, K, V>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in pairs {
            let key = key.into();
            if key.trim().is_empty() {
                return Err("attribute keys must not be empty".to_string());
            }
            if RESERVED_VECTOR_KEYS.contains(&key.as_str()) {
                return Err(format!("'{key}' is reserved"));
            }
            map.insert(key, value.into());
        }
        Ok(Self(map))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn merge(&mut self, other: SearchAttributes) {
        self.0.extend(other.0);
    }
}

/// Metadata object handed to the vector store with every chunk of a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub user_id: Uuid,
    pub document_id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub upload_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

/// Type of a tool configuration field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    Text,
    Integer,
    Number,
    Boolean,
}

impl ConfigKind {
    fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigField {
    pub kind: ConfigKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declares which configuration keys a catalog tool accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ConfigSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, ConfigField>,
}

impl ConfigSchema {
    pub fn field(mut self, name: impl Into<String>, kind: ConfigKind, required: bool) -> Self {
        self.fields.insert(
            name.into(),
            ConfigField {
                kind,
                required,
                description: None,
            },
        );
        self
    }
}

/// One configuration value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ConfigValue {
    fn matches(&self, kind: ConfigKind) -> bool {
        matches!(
            (self, kind),
            (Self::Boolean(_), ConfigKind::Boolean)
                | (Self::Integer(_), ConfigKind::Integer)
                | (Self::Integer(_), ConfigKind::Number)
                | (Self::Number(_), ConfigKind::Number)
                | (Self::Text(_), ConfigKind::Text)
        )
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Per-user settings of a tool, checked against the catalog's [`ConfigSchema`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct ToolConfiguration(BTreeMap<String, ConfigValue>);

impl ToolConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `self` with missing keys filled from `defaults`.
    pub fn with_defaults(mut self, defaults: &ToolConfiguration) -> Self {
        for (key, value) in &defaults.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    /// Rejects unknown keys, wrongly typed values and missing required keys.
    pub fn validate(&self, schema: &ConfigSchema) -> Result<(), String> {
        for (key, value) in &self.0 {
            let Some(field) = schema.fields.get(key) else {
                return Err(format!("unknown configuration key '{key}'"));
            };
            if !value.matches(field.kind) {
                return Err(format!("'{key}' must be {}", field.kind.name()));
            }
        }
        for (key, field) in &schema.fields {
            if field.required && !self.0.contains_key(key) {
                return Err(format!("missing required configuration key '{key}'"));
            }
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// One declared column of a template. Only `key` matters to the engine; `label`
/// and `type_hint` are carried for display.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
}

impl ColumnSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
            type_hint: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub created_by: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Keys used for export projection, in declared order. Columns with an empty
    /// key are skipped.
    pub fn column_keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.key.is_empty())
            .map(|c| c.key.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInput {
    #[serde(default)]
    #[validate(custom(function = "validate_not_blank", message = "Template name required"))]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub is_public: bool,
}

/// Partial update. `columns`, when present, replaces the whole list.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePatch {
    #[validate(custom(function = "validate_not_blank", message = "Template name must not be blank"))]
    pub name: Option<String>,
    pub columns: Option<Vec<ColumnSpec>>,
    pub is_public: Option<bool>,
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::row::{FieldMap, Row};
use crate::domain::template::{ColumnSpec, Template};

#[derive(sqlx::FromRow)]
pub(super) struct TemplateEntity {
    id: i64,
    name: String,
    columns_json: String,
    created_by: Option<String>,
    is_public: bool,
    created_at: String,
    updated_at: String,
}

impl From<TemplateEntity> for Template {
    fn from(entity: TemplateEntity) -> Self {
        let columns: Vec<ColumnSpec> = serde_json::from_str(&entity.columns_json)
            .unwrap_or_else(|e| {
                warn!(template_id = entity.id, error = %e, "Unreadable columns_json, treating as no columns");
                Vec::new()
            });

        Self {
            id: entity.id,
            name: entity.name,
            columns,
            created_by: entity.created_by,
            is_public: entity.is_public,
            created_at: parse_timestamp(&entity.created_at),
            updated_at: parse_timestamp(&entity.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct RowEntity {
    id: i64,
    template_id: i64,
    data_json: String,
    created_at: String,
}

impl From<RowEntity> for Row {
    fn from(entity: RowEntity) -> Self {
        let data: FieldMap = serde_json::from_str(&entity.data_json).unwrap_or_else(|e| {
            warn!(row_id = entity.id, error = %e, "Unreadable data_json, treating as empty row");
            FieldMap::new()
        });

        Self {
            id: entity.id,
            template_id: entity.template_id,
            data,
            created_at: parse_timestamp(&entity.created_at),
        }
    }
}

pub(super) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            warn!(value, error = %e, "Unreadable stored timestamp, substituting current time");
            chrono::Utc::now()
        })
}

/// Fixed-width UTC timestamp so `ORDER BY created_at` sorts chronologically.
pub(super) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

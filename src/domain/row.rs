use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Schema-free record: field key to optional text value. Keys keep the order the
/// source document gave them, through storage and back out.
pub type FieldMap = IndexMap<String, Option<String>>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: i64,
    pub template_id: i64,
    pub data: FieldMap,
    pub created_at: DateTime<Utc>,
}

/// Order in which a template's rows are read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// Most recent first (`id` descending). Used for listing.
    NewestFirst,
    /// Import order (`id` ascending). Used for export.
    ImportOrder,
}

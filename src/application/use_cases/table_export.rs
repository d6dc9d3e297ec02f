use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::domain::error::Result;
use crate::domain::row::{FieldMap, RowOrder};
use crate::domain::table_format::TableFormat;
use crate::infrastructure::codecs::TableCodecRegistry;
use crate::infrastructure::db::exchange::repository::ExchangeRepository;

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\\/\x00-\x1f\x7f]").unwrap());

/// An encoded document ready to hand to the caller.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

pub struct TableExportUseCase {
    repository: Arc<ExchangeRepository>,
    codecs: Arc<TableCodecRegistry>,
}

impl TableExportUseCase {
    pub fn new(repository: Arc<ExchangeRepository>, codecs: Arc<TableCodecRegistry>) -> Self {
        Self {
            repository,
            codecs,
        }
    }

    /// Rows come out in import order, projected onto the template's column keys.
    pub async fn export_rows(&self, template_id: i64, format: TableFormat) -> Result<ExportArtifact> {
        let template = self.repository.get_template(template_id).await?;
        let codec = self.codecs.encoder(format)?;

        let rows: Vec<FieldMap> = self
            .repository
            .list_rows(template_id, RowOrder::ImportOrder)
            .await?
            .into_iter()
            .map(|row| row.data)
            .collect();
        let columns = template.column_keys();

        let bytes = codec.encode(&columns, &rows)?;
        info!(
            template_id,
            format = %format,
            rows = rows.len(),
            columns = columns.len(),
            bytes = bytes.len(),
            "Export encoded"
        );

        Ok(ExportArtifact {
            bytes,
            content_type: format.content_type(),
            filename: export_filename(&template.name, format),
        })
    }
}

fn export_filename(template_name: &str, format: TableFormat) -> String {
    let stem = UNSAFE_FILENAME_CHARS.replace_all(template_name.trim(), "_");
    format!("{}.{}", stem, format.export_extension())
}

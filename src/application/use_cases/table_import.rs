use std::sync::Arc;

use tracing::{error, info};

use crate::domain::error::{AppError, Result};
use crate::domain::table_format::TableFormat;
use crate::infrastructure::codecs::TableCodecRegistry;
use crate::infrastructure::db::exchange::repository::ExchangeRepository;

/// Bytes in, rows out. Decoding happens fully in memory and the decoded rows are
/// committed in one transaction, so a failed import leaves nothing behind.
pub struct TableImportUseCase {
    repository: Arc<ExchangeRepository>,
    codecs: Arc<TableCodecRegistry>,
    max_upload_bytes: usize,
}

impl TableImportUseCase {
    pub fn new(
        repository: Arc<ExchangeRepository>,
        codecs: Arc<TableCodecRegistry>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            repository,
            codecs,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// `format` takes precedence over the extension of `filename`. Returns how many
    /// rows were stored.
    pub async fn import_rows(
        &self,
        template_id: i64,
        bytes: &[u8],
        filename: Option<&str>,
        format: Option<&str>,
    ) -> Result<u64> {
        if bytes.is_empty() {
            return Err(AppError::ValidationError("No file uploaded".to_string()));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload is {} bytes, limit is {}",
                bytes.len(),
                self.max_upload_bytes
            )));
        }

        let template = self.repository.get_template(template_id).await?;
        let format = TableFormat::resolve(filename, format)?;
        let codec = self.codecs.decoder(format)?;

        let records = codec.decode(bytes)?;
        info!(
            template_id,
            format = %format,
            codec = codec.name(),
            rows = records.len(),
            "Decoded upload"
        );

        let imported = match self.repository.insert_rows(template.id, &records).await {
            Ok(count) => count,
            Err(e) => {
                error!(template_id, format = %format, error = %e, "Import failed, nothing stored");
                return Err(e);
            }
        };

        info!(template_id, format = %format, rows = imported, "Import committed");
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::row::RowOrder;
    use crate::domain::template::{ColumnSpec, TemplateInput};

    const LIMIT: usize = 1024;

    async fn setup() -> (TableImportUseCase, Arc<ExchangeRepository>, i64) {
        let repository = Arc::new(ExchangeRepository::in_memory().await.unwrap());
        let template = repository
            .create_template(
                &TemplateInput {
                    name: "Sales".to_string(),
                    columns: vec![ColumnSpec::new("amount"), ColumnSpec::new("date")],
                    is_public: false,
                },
                None,
            )
            .await
            .unwrap();
        let use_case = TableImportUseCase::new(
            Arc::clone(&repository),
            Arc::new(TableCodecRegistry::with_default_codecs()),
            LIMIT,
        );
        (use_case, repository, template.id)
    }

    #[tokio::test]
    async fn test_import_csv_by_extension() {
        let (use_case, repository, id) = setup().await;
        let body = b"amount,date\n100,2024-01-01\n200,2024-02-01";

        let count = use_case
            .import_rows(id, body, Some("sales.csv"), None)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let rows = repository.list_rows(id, RowOrder::ImportOrder).await.unwrap();
        assert_eq!(rows[0].data["amount"].as_deref(), Some("100"));
        assert_eq!(rows[1].data["date"].as_deref(), Some("2024-02-01"));
    }

    #[tokio::test]
    async fn test_explicit_format_beats_extension() {
        let (use_case, _, id) = setup().await;
        let count = use_case
            .import_rows(id, b"amount\n5\n", Some("upload.bin"), Some("CSV"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_unknown_extension_stores_nothing() {
        let (use_case, repository, id) = setup().await;
        let result = use_case
            .import_rows(id, b"<rows/>", Some("rows.xml"), None)
            .await;

        assert!(matches!(result, Err(AppError::UnsupportedFormat(_))));
        assert_eq!(repository.count_rows(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let (use_case, _, id) = setup().await;
        let result = use_case.import_rows(id, b"", Some("a.csv"), None).await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_before_lookup() {
        let (use_case, _, _) = setup().await;
        let body = vec![b'a'; LIMIT + 1];
        // Missing template would be NotFound; the size check comes first.
        let result = use_case.import_rows(999, &body, Some("a.csv"), None).await;
        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
    }

    #[tokio::test]
    async fn test_missing_template_is_not_found() {
        let (use_case, _, _) = setup().await;
        let result = use_case
            .import_rows(999, b"a\n1\n", Some("a.csv"), None)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_document_stores_nothing() {
        let (use_case, repository, id) = setup().await;
        let result = use_case
            .import_rows(id, b"PK\x03\x04not really a zip", Some("table.docx"), None)
            .await;

        assert!(matches!(result, Err(AppError::MalformedInput(_))));
        assert_eq!(repository.count_rows(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_import_exported_pdf() {
        let (_, repository, id) = setup().await;
        let codecs = Arc::new(TableCodecRegistry::with_default_codecs());
        let use_case =
            TableImportUseCase::new(Arc::clone(&repository), Arc::clone(&codecs), 1024 * 1024);
        let pdf = codecs
            .encoder(TableFormat::Pdf)
            .unwrap()
            .encode(
                &["amount".to_string(), "date".to_string()],
                &[[
                    ("amount".to_string(), Some("100".to_string())),
                    ("date".to_string(), Some("2024-01-01".to_string())),
                ]
                .into_iter()
                .collect()],
            )
            .unwrap();

        let count = use_case
            .import_rows(id, &pdf, Some("report.pdf"), None)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let rows = repository.list_rows(id, RowOrder::ImportOrder).await.unwrap();
        assert_eq!(rows[0].data["date"].as_deref(), Some("2024-01-01"));
    }
}

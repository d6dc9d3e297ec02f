//! Table codecs: one decode/encode pair per external document format, looked up
//! through [`TableCodecRegistry`] by [`TableFormat`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::error::{AppError, Result};
use crate::domain::row::FieldMap;
use crate::domain::table_format::TableFormat;

mod delimited;
mod docx;
mod pdf;
mod spreadsheet;

pub use self::delimited::CsvCodec;
pub use self::docx::DocxCodec;
pub use self::pdf::PdfCodec;
pub use self::spreadsheet::SpreadsheetCodec;

/// Header of the single column used when a template declares no columns.
pub const FALLBACK_COLUMN: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecCapability {
    Decode,
    Encode,
}

pub trait TableCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this build can perform `capability`. Codecs backed by an optional
    /// library report `false` when it was compiled out.
    fn supports(&self, capability: CodecCapability) -> bool {
        let _ = capability;
        true
    }

    /// Bytes to ordered field maps. `UnsupportedFormat` when the bytes are not this
    /// codec's container at all, `MalformedInput` when they are but cannot be read.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<FieldMap>>;

    /// Header plus one record per row, projected onto `columns`.
    fn encode(&self, columns: &[String], rows: &[FieldMap]) -> Result<Vec<u8>>;
}

pub struct TableCodecRegistry {
    codecs: HashMap<TableFormat, Arc<dyn TableCodec>>,
}

impl TableCodecRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    pub fn with_default_codecs() -> Self {
        let spreadsheet: Arc<dyn TableCodec> = Arc::new(SpreadsheetCodec);
        let mut registry = Self::empty();
        registry.register(TableFormat::Csv, Arc::new(CsvCodec::default()));
        registry.register(TableFormat::Xlsx, Arc::clone(&spreadsheet));
        registry.register(TableFormat::Xls, spreadsheet);
        registry.register(TableFormat::Docx, Arc::new(DocxCodec));
        registry.register(TableFormat::Pdf, Arc::new(PdfCodec::default()));
        registry
    }

    pub fn register(&mut self, format: TableFormat, codec: Arc<dyn TableCodec>) {
        self.codecs.insert(format, codec);
    }

    pub fn decoder(&self, format: TableFormat) -> Result<Arc<dyn TableCodec>> {
        self.lookup(format, CodecCapability::Decode)
    }

    pub fn encoder(&self, format: TableFormat) -> Result<Arc<dyn TableCodec>> {
        self.lookup(format, CodecCapability::Encode)
    }

    fn lookup(&self, format: TableFormat, capability: CodecCapability) -> Result<Arc<dyn TableCodec>> {
        let codec = self.codecs.get(&format).ok_or_else(|| {
            AppError::UnsupportedFormat(format!("No codec registered for '{}'", format))
        })?;

        if !codec.supports(capability) {
            let action = match capability {
                CodecCapability::Decode => "import",
                CodecCapability::Encode => "export",
            };
            return Err(AppError::UnsupportedFormat(format!(
                "{} {} is not available in this build",
                format, action
            )));
        }

        Ok(Arc::clone(codec))
    }
}

impl Default for TableCodecRegistry {
    fn default() -> Self {
        Self::with_default_codecs()
    }
}

/// A table ready to be written: header cells plus body cells, all text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub header: Vec<String>,
    pub body: Vec<Vec<String>>,
}

impl TableLayout {
    /// Project rows onto `columns`. Missing and null values become `""`. With no
    /// columns every row collapses into one `data` cell holding its JSON.
    pub fn project(columns: &[String], rows: &[FieldMap]) -> Self {
        if columns.is_empty() {
            let body = rows
                .iter()
                .map(|row| vec![serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string())])
                .collect();
            return Self {
                header: vec![FALLBACK_COLUMN.to_string()],
                body,
            };
        }

        let body = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|key| row.get(key).cloned().flatten().unwrap_or_default())
                    .collect()
            })
            .collect();

        Self {
            header: columns.to_vec(),
            body,
        }
    }
}

/// Pair header labels with cell values up to the shorter of the two.
pub(crate) fn zip_record<I>(headers: &[String], values: I) -> FieldMap
where
    I: IntoIterator<Item = Option<String>>,
{
    headers.iter().cloned().zip(values).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReadOnlyCodec;

    impl TableCodec for ReadOnlyCodec {
        fn name(&self) -> &'static str {
            "read-only"
        }

        fn supports(&self, capability: CodecCapability) -> bool {
            capability == CodecCapability::Decode
        }

        fn decode(&self, _bytes: &[u8]) -> Result<Vec<FieldMap>> {
            Ok(Vec::new())
        }

        fn encode(&self, _columns: &[String], _rows: &[FieldMap]) -> Result<Vec<u8>> {
            Err(AppError::Internal("unreachable".to_string()))
        }
    }

    fn row(pairs: &[(&str, Option<&str>)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_default_registry_covers_every_format() {
        let registry = TableCodecRegistry::with_default_codecs();
        for format in TableFormat::ALL {
            assert!(registry.decoder(format).is_ok(), "no decoder for {}", format);
        }
        assert_eq!(registry.decoder(TableFormat::Csv).unwrap().name(), "csv");
        assert!(registry.encoder(TableFormat::Pdf).is_ok());
    }

    #[test]
    fn test_unregistered_format_is_unsupported() {
        let registry = TableCodecRegistry::empty();
        assert!(matches!(
            registry.decoder(TableFormat::Csv),
            Err(AppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_capability_is_unsupported() {
        let mut registry = TableCodecRegistry::empty();
        registry.register(TableFormat::Xlsx, Arc::new(ReadOnlyCodec));

        assert!(registry.decoder(TableFormat::Xlsx).is_ok());
        assert!(matches!(
            registry.encoder(TableFormat::Xlsx),
            Err(AppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_project_fills_missing_and_null_with_empty() {
        let columns = vec!["amount".to_string(), "date".to_string()];
        let rows = vec![
            row(&[("amount", Some("100")), ("extra", Some("x"))]),
            row(&[("amount", None), ("date", Some("2024-02-01"))]),
        ];

        let layout = TableLayout::project(&columns, &rows);
        assert_eq!(layout.header, columns);
        assert_eq!(
            layout.body,
            vec![
                vec!["100".to_string(), String::new()],
                vec![String::new(), "2024-02-01".to_string()],
            ]
        );
    }

    #[test]
    fn test_project_without_columns_uses_json_blob() {
        let rows = vec![row(&[("b", Some("2")), ("a", None)])];
        let layout = TableLayout::project(&[], &rows);

        assert_eq!(layout.header, vec![FALLBACK_COLUMN.to_string()]);
        assert_eq!(layout.body, vec![vec![r#"{"a":null,"b":"2"}"#.to_string()]]);
    }

    #[test]
    fn test_zip_record_stops_at_shorter_side() {
        let headers = vec!["a".to_string(), "b".to_string()];
        let short = zip_record(&headers, vec![Some("1".to_string())]);
        assert_eq!(short.len(), 1);
        assert!(!short.contains_key("b"));

        let long = zip_record(
            &headers,
            vec![Some("1".to_string()), None, Some("3".to_string())],
        );
        assert_eq!(long.len(), 2);
        assert_eq!(long.get("b"), Some(&None));
    }
}

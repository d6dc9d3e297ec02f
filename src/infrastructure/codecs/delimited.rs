use csv::{ReaderBuilder, Terminator, WriterBuilder};
use tracing::warn;

use super::{zip_record, TableCodec, TableLayout};
use crate::domain::error::{AppError, Result};
use crate::domain::row::FieldMap;

/// Delimited-text codec. The first record is the header.
pub struct CsvCodec {
    delimiter: u8,
}

impl Default for CsvCodec {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvCodec {
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl TableCodec for CsvCodec {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<FieldMap>> {
        // Invalid UTF-8 sequences are replaced rather than rejected.
        let (content, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
        if had_errors {
            warn!("CSV upload contained invalid UTF-8; offending bytes were replaced");
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::MalformedInput(format!("Failed to read CSV header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut out = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(record = index + 1, error = %e, "Skipping unreadable CSV record");
                    continue;
                }
            };
            out.push(zip_record(
                &headers,
                record.iter().map(|value| Some(value.to_string())),
            ));
        }

        Ok(out)
    }

    fn encode(&self, columns: &[String], rows: &[FieldMap]) -> Result<Vec<u8>> {
        let layout = TableLayout::project(columns, rows);

        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer
            .write_record(&layout.header)
            .map_err(|e| AppError::Internal(format!("Failed to write CSV header: {}", e)))?;
        for record in &layout.body {
            writer
                .write_record(record)
                .map_err(|e| AppError::Internal(format!("Failed to write CSV record: {}", e)))?;
        }

        writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("Failed to flush CSV output: {}", e)))
    }
}

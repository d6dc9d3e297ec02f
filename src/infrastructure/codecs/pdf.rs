use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

use super::{TableCodec, TableLayout};
use crate::domain::error::{AppError, Result};
use crate::domain::row::FieldMap;

mod layout;

use self::layout::{detect_tables, extract_runs, table_to_field_maps};

const PDF_MAGIC: &[u8] = b"%PDF-";
/// Readers tolerate leading junk before the header up to this offset.
const MAGIC_SEARCH_WINDOW: usize = 1024;
const MIN_PAGE_WIDTH: i64 = 595;
const MIN_COLUMN_WIDTH: f64 = 40.0;
const COLUMN_PADDING: f64 = 18.0;

/// PDF table extraction and a simple tabular writer.
///
/// Decoding reads the text layer only: lines with two or more column-aligned cells
/// form a table whose first line is the header. Scanned pages and single-column
/// tables yield no rows.
pub struct PdfCodec {
    font_size: i64,
    margin: i64,
    page_height: i64,
}

impl Default for PdfCodec {
    fn default() -> Self {
        // A4 portrait height, 10pt Helvetica.
        Self {
            font_size: 10,
            margin: 40,
            page_height: 842,
        }
    }
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(MAGIC_SEARCH_WINDOW + PDF_MAGIC.len())];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

impl TableCodec for PdfCodec {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<FieldMap>> {
        if !looks_like_pdf(bytes) {
            return Err(AppError::UnsupportedFormat(
                "Upload is not a PDF document".to_string(),
            ));
        }

        let document = Document::load_mem(bytes)
            .map_err(|e| AppError::MalformedInput(format!("Failed to load PDF: {}", e)))?;

        let mut out = Vec::new();
        for (page_number, page_id) in document.get_pages() {
            let content = match document
                .get_page_content(page_id)
                .and_then(|data| Content::decode(&data))
            {
                Ok(content) => content,
                Err(e) => {
                    warn!(page = page_number, error = %e, "Skipping unreadable PDF page");
                    continue;
                }
            };

            let tables = detect_tables(extract_runs(&content.operations));
            debug!(page = page_number, tables = tables.len(), "Scanned PDF page");
            for table in &tables {
                out.extend(table_to_field_maps(table));
            }
        }

        Ok(out)
    }

    fn encode(&self, columns: &[String], rows: &[FieldMap]) -> Result<Vec<u8>> {
        let layout = TableLayout::project(columns, rows);
        let widths = self.column_widths(&layout);
        let page_width = (2 * self.margin + widths.iter().sum::<i64>()).max(MIN_PAGE_WIDTH);

        let row_height = self.font_size * 2;
        let rows_per_page =
            (((self.page_height - 2 * self.margin) / row_height) - 1).max(1) as usize;

        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let regular = document.add_object(helvetica("Helvetica"));
        let bold = document.add_object(helvetica("Helvetica-Bold"));
        let resources_id = document.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
            },
        });

        let chunks: Vec<&[Vec<String>]> = if layout.body.is_empty() {
            vec![&layout.body[..]]
        } else {
            layout.body.chunks(rows_per_page).collect()
        };

        let mut kids: Vec<Object> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let operations = self.page_operations(&layout.header, chunk, &widths, row_height);
            let content = Content { operations }
                .encode()
                .map_err(|e| AppError::Internal(format!("Failed to encode PDF page: {}", e)))?;
            let content_id = document.add_object(Stream::new(dictionary! {}, content));
            let page_id = document.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), page_width.into(), self.page_height.into()],
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
            }),
        );
        let catalog_id: ObjectId = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        document
            .save_to(&mut buffer)
            .map_err(|e| AppError::Internal(format!("Failed to write PDF: {}", e)))?;
        Ok(buffer)
    }
}

impl PdfCodec {
    fn column_widths(&self, layout: &TableLayout) -> Vec<i64> {
        let char_width = self.font_size as f64 * 0.6;
        (0..layout.header.len())
            .map(|i| {
                let longest = std::iter::once(&layout.header[i])
                    .chain(layout.body.iter().filter_map(|record| record.get(i)))
                    .map(|text| text.chars().count())
                    .max()
                    .unwrap_or(0);
                ((longest as f64 * char_width).max(MIN_COLUMN_WIDTH) + COLUMN_PADDING).ceil() as i64
            })
            .collect()
    }

    /// Header on every page, then the page's slice of the body.
    fn page_operations(
        &self,
        header: &[String],
        body: &[Vec<String>],
        widths: &[i64],
        row_height: i64,
    ) -> Vec<Operation> {
        let mut operations = Vec::new();
        let mut y = self.page_height - self.margin - self.font_size;

        self.push_line(&mut operations, "F2", header, widths, y);
        for record in body {
            y -= row_height;
            self.push_line(&mut operations, "F1", record, widths, y);
        }
        operations
    }

    fn push_line(
        &self,
        operations: &mut Vec<Operation>,
        font: &str,
        cells: &[String],
        widths: &[i64],
        y: i64,
    ) {
        let mut x = self.margin;
        for (text, width) in cells.iter().zip(widths) {
            if !text.is_empty() {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new(
                    "Tf",
                    vec![Object::Name(font.as_bytes().to_vec()), self.font_size.into()],
                ));
                operations.push(Operation::new("Td", vec![x.into(), y.into()]));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(latin1_bytes(text), StringFormat::Literal)],
                ));
                operations.push(Operation::new("ET", vec![]));
            }
            x += width;
        }
    }
}

fn helvetica(base_font: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Standard-14 fonts only cover single-byte text. Line breaks flatten to spaces
/// and anything outside Latin-1 becomes `?`.
fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => b' ',
            c if (c as u32) <= 0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    fn columns(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_encode_round_trips_through_decode() {
        let codec = PdfCodec::default();
        let rows = vec![
            row(&[("amount", "100"), ("date", "2024-01-01"), ("note", "Café order")]),
            row(&[("amount", "250"), ("date", "2024-02-01")]),
        ];

        let bytes = codec.encode(&columns(&["amount", "date", "note"]), &rows).unwrap();
        assert!(bytes.starts_with(PDF_MAGIC));

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0]["amount"].as_deref(), Some("100"));
        assert_eq!(decoded[0]["date"].as_deref(), Some("2024-01-01"));
        assert_eq!(decoded[0]["note"].as_deref(), Some("Café order"));
        assert_eq!(decoded[1]["amount"].as_deref(), Some("250"));
        assert_eq!(decoded[1]["note"].as_deref(), Some(""));
    }

    #[test]
    fn test_long_tables_span_pages_in_order() {
        let codec = PdfCodec::default();
        let rows: Vec<FieldMap> = (0..80)
            .map(|i| row(&[("id", i.to_string().as_str()), ("label", format!("item {}", i).as_str())]))
            .collect();

        let bytes = codec.encode(&columns(&["id", "label"]), &rows).unwrap();
        let document = Document::load_mem(&bytes).unwrap();
        assert!(document.get_pages().len() > 1);

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 80);
        assert_eq!(decoded[0]["id"].as_deref(), Some("0"));
        assert_eq!(decoded[79]["label"].as_deref(), Some("item 79"));
    }

    #[test]
    fn test_header_only_export_decodes_to_nothing() {
        let codec = PdfCodec::default();
        let bytes = codec.encode(&columns(&["amount", "date"]), &[]).unwrap();
        assert!(codec.decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_non_pdf_bytes_are_unsupported() {
        let err = PdfCodec::default().decode(b"amount,date\n1,2\n").unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_damaged_pdf_is_malformed() {
        let err = PdfCodec::default()
            .decode(b"%PDF-1.7\nthis is not a real document body\n")
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedInput(_)));
    }

    #[test]
    fn test_latin1_bytes_replaces_unrepresentable() {
        assert_eq!(latin1_bytes("é\nж"), vec![0xE9, b' ', b'?']);
    }
}

use std::io::Cursor;

use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};
use tracing::debug;

use super::{zip_record, TableCodec, TableLayout};
use crate::domain::error::{AppError, Result};
use crate::domain::row::FieldMap;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Word-processing codec. Every top-level table is read independently: its first
/// row labels the columns, each later row becomes a field map.
pub struct DocxCodec;

impl TableCodec for DocxCodec {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<FieldMap>> {
        if !bytes.starts_with(ZIP_MAGIC) {
            return Err(AppError::UnsupportedFormat(
                "Upload is not a DOCX document".to_string(),
            ));
        }

        let docx = docx_rs::read_docx(bytes)
            .map_err(|e| AppError::MalformedInput(format!("Failed to parse DOCX file: {}", e)))?;

        let mut out = Vec::new();
        for (index, child) in docx.document.children.iter().enumerate() {
            if let docx_rs::DocumentChild::Table(table) = child {
                let before = out.len();
                extract_table_records(table, &mut out);
                debug!(element = index, rows = out.len() - before, "Read DOCX table");
            }
        }
        Ok(out)
    }

    fn encode(&self, columns: &[String], rows: &[FieldMap]) -> Result<Vec<u8>> {
        let layout = TableLayout::project(columns, rows);

        let mut table_rows = Vec::with_capacity(layout.body.len() + 1);
        table_rows.push(TableRow::new(layout.header.iter().map(|h| text_cell(h)).collect()));
        for record in &layout.body {
            table_rows.push(TableRow::new(record.iter().map(|v| text_cell(v)).collect()));
        }

        let mut cursor = Cursor::new(Vec::new());
        Docx::new()
            .add_table(Table::new(table_rows))
            .build()
            .pack(&mut cursor)
            .map_err(|e| AppError::Internal(format!("Failed to write DOCX file: {}", e)))?;

        Ok(cursor.into_inner())
    }
}

/// One paragraph per line so multi-line values read back unchanged.
fn text_cell(value: &str) -> TableCell {
    value.split('\n').fold(TableCell::new(), |cell, line| {
        cell.add_paragraph(Paragraph::new().add_run(Run::new().add_text(line)))
    })
}

fn extract_table_records(table: &docx_rs::Table, out: &mut Vec<FieldMap>) {
    let mut rows = table.rows.iter().map(|child| {
        let docx_rs::TableChild::TableRow(row) = child;
        extract_row_cells(row)
    });

    let headers: Vec<String> = match rows.next() {
        Some(cells) => cells.iter().map(|c| c.trim().to_string()).collect(),
        None => return,
    };

    for cells in rows {
        out.push(zip_record(&headers, cells.into_iter().map(Some)));
    }
}

/// One value per grid column: a horizontally merged cell repeats its text across
/// every column it spans so later cells stay under their headers.
fn extract_row_cells(row: &docx_rs::TableRow) -> Vec<String> {
    row.cells
        .iter()
        .flat_map(|cell| {
            let docx_rs::TableRowChild::TableCell(cell) = cell;
            std::iter::repeat(extract_cell_text(cell)).take(grid_span(cell))
        })
        .collect()
}

/// The span is only reachable through the property's serialized form.
fn grid_span(cell: &docx_rs::TableCell) -> usize {
    serde_json::to_value(&cell.property)
        .ok()
        .and_then(|property| property.get("gridSpan")?.as_u64())
        .map_or(1, |span| span.max(1) as usize)
}

/// Paragraph texts joined by newlines. Nested tables are not part of the value.
fn extract_cell_text(cell: &docx_rs::TableCell) -> String {
    let mut parts = Vec::new();
    for content in &cell.children {
        if let docx_rs::TableCellContent::Paragraph(paragraph) = content {
            parts.push(extract_paragraph(paragraph));
        }
    }
    parts.join("\n")
}

fn extract_paragraph(paragraph: &docx_rs::Paragraph) -> String {
    let mut buffer = String::new();
    for child in &paragraph.children {
        extract_paragraph_child(child, &mut buffer);
    }
    buffer
}

fn extract_paragraph_child(child: &docx_rs::ParagraphChild, buffer: &mut String) {
    match child {
        docx_rs::ParagraphChild::Run(run) => extract_run(run, buffer),
        docx_rs::ParagraphChild::Hyperlink(link) => {
            for link_child in &link.children {
                extract_paragraph_child(link_child, buffer);
            }
        }
        docx_rs::ParagraphChild::Insert(insert) => {
            for insert_child in &insert.children {
                if let docx_rs::InsertChild::Run(run) = insert_child {
                    extract_run(run, buffer);
                }
            }
        }
        _ => {}
    }
}

fn extract_run(run: &docx_rs::Run, buffer: &mut String) {
    for child in &run.children {
        match child {
            docx_rs::RunChild::Text(text) => buffer.push_str(&text.text),
            docx_rs::RunChild::Tab(_) | docx_rs::RunChild::PTab(_) => buffer.push('\t'),
            docx_rs::RunChild::Break(_) => buffer.push('\n'),
            docx_rs::RunChild::Sym(sym) => buffer.push_str(&sym.char),
            _ => {}
        }
    }
}

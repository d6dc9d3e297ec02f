use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};

use calamine::{Data, ExcelDateTime, Range, Reader, Xls, Xlsx};
use chrono::Timelike;
use tracing::debug;

use super::{zip_record, CodecCapability, TableCodec};
use crate::domain::error::{AppError, Result};
use crate::domain::row::FieldMap;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Spreadsheet codec. Reads `.xlsx` and legacy `.xls` (first worksheet only) and
/// writes `.xlsx`.
pub struct SpreadsheetCodec;

impl TableCodec for SpreadsheetCodec {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    fn supports(&self, capability: CodecCapability) -> bool {
        match capability {
            CodecCapability::Decode => true,
            CodecCapability::Encode => cfg!(feature = "xlsx-writer"),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<FieldMap>> {
        let range = if bytes.starts_with(ZIP_MAGIC) {
            let mut workbook = Xlsx::new(Cursor::new(bytes)).map_err(|e| {
                AppError::MalformedInput(format!("Failed to open Excel workbook: {}", e))
            })?;
            first_sheet(&mut workbook)?
        } else if bytes.starts_with(OLE_MAGIC) {
            let mut workbook = Xls::new(Cursor::new(bytes)).map_err(|e| {
                AppError::MalformedInput(format!("Failed to open Excel workbook: {}", e))
            })?;
            first_sheet(&mut workbook)?
        } else {
            return Err(AppError::UnsupportedFormat(
                "Upload is not an Excel workbook".to_string(),
            ));
        };

        Ok(range_to_field_maps(&range))
    }

    #[cfg(feature = "xlsx-writer")]
    fn encode(&self, columns: &[String], rows: &[FieldMap]) -> Result<Vec<u8>> {
        write_xlsx(&super::TableLayout::project(columns, rows))
    }

    #[cfg(not(feature = "xlsx-writer"))]
    fn encode(&self, _columns: &[String], _rows: &[FieldMap]) -> Result<Vec<u8>> {
        Err(AppError::UnsupportedFormat(
            "Spreadsheet export is not available in this build".to_string(),
        ))
    }
}

fn first_sheet<RS, R>(workbook: &mut R) -> Result<Range<Data>>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::MalformedInput("No worksheet found".to_string()))?
        .map_err(|e| AppError::MalformedInput(format!("Failed to read Excel range: {}", e)))
}

/// First row is the header; every later non-blank row becomes a field map.
fn range_to_field_maps(range: &Range<Data>) -> Vec<FieldMap> {
    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => dedupe_headers(
            header_row
                .iter()
                .enumerate()
                .map(|(i, cell)| cell_text(cell).unwrap_or_else(|| format!("Unnamed: {}", i))),
        ),
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    for (index, row) in rows.enumerate() {
        let values: Vec<Option<String>> = row.iter().map(cell_text).collect();
        if values.iter().all(Option::is_none) {
            debug!(row = index + 1, "Skipping blank spreadsheet row");
            continue;
        }
        out.push(zip_record(&headers, values));
    }
    out
}

/// Empty cells are `None`. Whole floats drop their fractional part.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(value) => Some(excel_datetime_text(value)),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Date-formatted cells as ISO text: `YYYY-MM-DD` at midnight, with the time
/// otherwise. Durations render as `HH:MM:SS`.
fn excel_datetime_text(value: &ExcelDateTime) -> String {
    if value.is_duration() {
        if let Some(duration) = value.as_duration() {
            let secs = duration.num_seconds();
            return format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);
        }
    } else if let Some(datetime) = value.as_datetime() {
        if datetime.num_seconds_from_midnight() == 0 {
            return datetime.format("%Y-%m-%d").to_string();
        }
        return datetime.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    value.as_f64().to_string()
}

/// Repeated labels become `label.1`, `label.2`, ... in order of appearance, so no
/// column silently overwrites another.
fn dedupe_headers<I>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut taken: HashSet<String> = HashSet::new();
    labels
        .into_iter()
        .map(|label| {
            if taken.insert(label.clone()) {
                return label;
            }
            let mut suffix = 1;
            loop {
                let candidate = format!("{}.{}", label, suffix);
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
                suffix += 1;
            }
        })
        .collect()
}

#[cfg(feature = "xlsx-writer")]
fn write_xlsx(layout: &super::TableLayout) -> Result<Vec<u8>> {
    use rust_xlsxwriter::Workbook;

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    let xlsx_err = |e: rust_xlsxwriter::XlsxError| {
        AppError::Internal(format!("Failed to write Excel workbook: {}", e))
    };

    for (col, header) in layout.header.iter().enumerate() {
        let col = column_index(col)?;
        worksheet.write_string(0, col, header).map_err(xlsx_err)?;
    }

    for (row_index, record) in layout.body.iter().enumerate() {
        let row = u32::try_from(row_index + 1)
            .map_err(|_| AppError::Internal("Too many rows for a worksheet".to_string()))?;
        for (col, value) in record.iter().enumerate() {
            // Leave the cell empty so it reads back as null.
            if value.is_empty() {
                continue;
            }
            worksheet
                .write_string(row, column_index(col)?, value)
                .map_err(xlsx_err)?;
        }
    }

    workbook.save_to_buffer().map_err(xlsx_err)
}

#[cfg(feature = "xlsx-writer")]
fn column_index(col: usize) -> Result<u16> {
    u16::try_from(col).map_err(|_| AppError::Internal("Too many columns for a worksheet".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_workbook_bytes_are_unsupported() {
        let result = SpreadsheetCodec.decode(b"amount,date\n1,2\n");
        assert!(matches!(result, Err(AppError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_corrupt_zip_is_malformed() {
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(b"definitely not a workbook");
        let result = SpreadsheetCodec.decode(&bytes);
        assert!(matches!(result, Err(AppError::MalformedInput(_))));
    }

    #[test]
    fn test_cell_text_conversions() {
        assert_eq!(cell_text(&Data::Empty), None);
        assert_eq!(cell_text(&Data::String(String::new())), None);
        assert_eq!(cell_text(&Data::Float(100.0)).as_deref(), Some("100"));
        assert_eq!(cell_text(&Data::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(cell_text(&Data::Int(-3)).as_deref(), Some("-3"));
        assert_eq!(cell_text(&Data::Bool(true)).as_deref(), Some("true"));
        assert_eq!(
            cell_text(&Data::DateTimeIso("2024-01-01T08:00:00".to_string())).as_deref(),
            Some("2024-01-01T08:00:00")
        );
    }

    #[test]
    fn test_date_serials_render_as_iso() {
        use calamine::ExcelDateTimeType;

        let date = ExcelDateTime::new(45292.0, ExcelDateTimeType::DateTime, false);
        let stamp = ExcelDateTime::new(45292.4375, ExcelDateTimeType::DateTime, false);
        let span = ExcelDateTime::new(1.5, ExcelDateTimeType::TimeDelta, false);

        assert_eq!(cell_text(&Data::DateTime(date)).as_deref(), Some("2024-01-01"));
        assert_eq!(
            cell_text(&Data::DateTime(stamp)).as_deref(),
            Some("2024-01-01 10:30:00")
        );
        assert_eq!(cell_text(&Data::DateTime(span)).as_deref(), Some("36:00:00"));
    }

    #[test]
    fn test_duplicate_headers_get_numbered() {
        let labels = ["a", "b", "a", "a", "a.1"].map(String::from);
        assert_eq!(
            dedupe_headers(labels),
            vec!["a", "b", "a.1", "a.2", "a.1.1"]
        );

        let mut range: Range<Data> = Range::new((0, 0), (1, 1));
        range.set_value((0, 0), Data::String("amount".to_string()));
        range.set_value((0, 1), Data::String("amount".to_string()));
        range.set_value((1, 0), Data::Float(1.0));
        range.set_value((1, 1), Data::Float(2.0));

        let rows = range_to_field_maps(&range);
        assert_eq!(rows[0]["amount"].as_deref(), Some("1"));
        assert_eq!(rows[0]["amount.1"].as_deref(), Some("2"));
    }

    #[test]
    fn test_range_to_field_maps_nulls_and_unnamed_headers() {
        let mut range: Range<Data> = Range::new((0, 0), (3, 2));
        range.set_value((0, 0), Data::String("amount".to_string()));
        range.set_value((0, 2), Data::String("note".to_string()));
        range.set_value((1, 0), Data::Float(100.0));
        range.set_value((1, 1), Data::String("x".to_string()));
        // row 2 left blank
        range.set_value((3, 2), Data::String("late".to_string()));

        let rows = range_to_field_maps(&range);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0]["amount"].as_deref(), Some("100"));
        assert_eq!(rows[0]["Unnamed: 1"].as_deref(), Some("x"));
        assert_eq!(rows[0]["note"], None);

        assert_eq!(rows[1]["amount"], None);
        assert_eq!(rows[1]["note"].as_deref(), Some("late"));
    }

    #[cfg(feature = "xlsx-writer")]
    #[test]
    fn test_encode_then_decode_keeps_empty_cells_null() {
        let columns = vec!["amount".to_string(), "date".to_string()];
        let rows: Vec<FieldMap> = vec![
            [("amount".to_string(), Some("100".to_string()))].into_iter().collect(),
            [
                ("amount".to_string(), Some("200".to_string())),
                ("date".to_string(), Some("2024-02-01".to_string())),
            ]
            .into_iter()
            .collect(),
        ];

        let bytes = SpreadsheetCodec.encode(&columns, &rows).unwrap();
        assert!(bytes.starts_with(ZIP_MAGIC));

        let decoded = SpreadsheetCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0]["amount"].as_deref(), Some("100"));
        assert_eq!(decoded[0]["date"], None);
        assert_eq!(decoded[1]["date"].as_deref(), Some("2024-02-01"));
    }

    #[cfg(feature = "xlsx-writer")]
    #[test]
    fn test_date_formatted_cells_decode_as_dates() {
        use rust_xlsxwriter::{ExcelDateTime as XlsxDateTime, Format, Workbook};

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let stamp_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

        sheet.write_string(0, 0, "date").unwrap();
        sheet.write_string(0, 1, "amount").unwrap();
        sheet.write_string(0, 2, "posted").unwrap();
        sheet
            .write_datetime_with_format(1, 0, &XlsxDateTime::from_ymd(2024, 1, 1).unwrap(), &date_format)
            .unwrap();
        sheet.write_number(1, 1, 100).unwrap();
        sheet
            .write_datetime_with_format(
                1,
                2,
                &XlsxDateTime::from_ymd(2024, 1, 1).unwrap().and_hms(10, 30, 0).unwrap(),
                &stamp_format,
            )
            .unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let decoded = SpreadsheetCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0]["date"].as_deref(), Some("2024-01-01"));
        assert_eq!(decoded[0]["amount"].as_deref(), Some("100"));
        assert_eq!(decoded[0]["posted"].as_deref(), Some("2024-01-01 10:30:00"));
    }

    #[cfg(not(feature = "xlsx-writer"))]
    #[test]
    fn test_encode_reports_missing_capability() {
        assert!(!SpreadsheetCodec.supports(CodecCapability::Encode));
    }
}

//! Table detection over a page's content stream. Text-showing operators are
//! turned into positioned runs, runs into lines, and runs of column-aligned lines
//! into tables.

use lopdf::content::Operation;
use lopdf::Object;

use crate::infrastructure::codecs::zip_record;
use crate::domain::row::FieldMap;

/// Two runs closer than this vertically sit on the same line.
const LINE_TOLERANCE: f32 = 2.5;
/// Largest vertical gap between consecutive table lines, in font sizes.
const ROW_GAP_FACTOR: f32 = 3.0;
/// A run starting within this many font sizes of a column anchor belongs to it.
const ANCHOR_FACTOR: f32 = 0.8;
/// Runs whose estimated end is this close to the next run's start are one cell.
const MERGE_GAP_FACTOR: f32 = 0.6;
/// Rough Helvetica advance per character, in font sizes.
const CHAR_WIDTH_FACTOR: f32 = 0.5;
/// TJ adjustments below this (thousandths of an em) read as a word space.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

#[derive(Debug, Clone, PartialEq)]
pub(super) struct TextRun {
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    pub text: String,
}

impl TextRun {
    fn estimated_end(&self) -> f32 {
        self.x + self.text.chars().count() as f32 * self.font_size * CHAR_WIDTH_FACTOR
    }
}

/// Rows of cells, top to bottom. `None` where a row has nothing under a column.
pub(super) type ExtractedTable = Vec<Vec<Option<String>>>;

struct TextState {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    leading: f32,
    font_size: f32,
    /// Set by positioning operators; consecutive shows without one extend the
    /// previous run.
    moved: bool,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            leading: 0.0,
            font_size: 0.0,
            moved: true,
        }
    }

    fn translate_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply([1.0, 0.0, 0.0, 1.0, tx, ty], self.tlm);
        self.tm = self.tlm;
        self.moved = true;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.translate_line(0.0, -leading);
    }

    fn show(&mut self, text: String, runs: &mut Vec<TextRun>) {
        if !self.moved {
            if let Some(last) = runs.last_mut() {
                last.text.push_str(&text);
                return;
            }
        }
        self.moved = false;

        let device = multiply(self.tm, self.ctm);
        let scale = (self.tm[3] * self.ctm[3]).abs();
        let font_size = if scale > 0.0 {
            self.font_size * scale
        } else {
            self.font_size
        };

        runs.push(TextRun {
            x: device[4],
            y: device[5],
            font_size: if font_size > 0.0 { font_size } else { 1.0 },
            text,
        });
    }
}

/// `m` then `n`, in PDF's row-vector convention.
fn multiply(m: Matrix, n: Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, operand) in out.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(out)
}

/// UTF-16BE when the string carries a byte-order mark, single-byte otherwise.
pub(super) fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn string_operand(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

fn tj_array_text(items: &[Object]) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
            other => {
                if number(other).is_some_and(|adjust| adjust < TJ_SPACE_THRESHOLD) {
                    text.push(' ');
                }
            }
        }
    }
    text
}

/// Positioned text runs in content-stream order.
pub(super) fn extract_runs(operations: &[Operation]) -> Vec<TextRun> {
    let mut state = TextState::new();
    let mut runs = Vec::new();

    for op in operations {
        let operands = op.operands.as_slice();
        match op.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => {
                if let Some(ctm) = state.ctm_stack.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(m) = numbers::<6>(operands) {
                    state.ctm = multiply(m, state.ctm);
                }
            }
            "BT" => {
                state.tm = IDENTITY;
                state.tlm = IDENTITY;
                state.moved = true;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some([leading]) = numbers::<1>(operands) {
                    state.leading = leading;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    state.translate_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    state.leading = -ty;
                    state.translate_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = numbers::<6>(operands) {
                    state.tm = m;
                    state.tlm = m;
                    state.moved = true;
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(string_operand) {
                    state.show(text, &mut runs);
                }
            }
            "'" => {
                state.next_line();
                if let Some(text) = operands.first().and_then(string_operand) {
                    state.show(text, &mut runs);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(text) = operands.get(2).and_then(string_operand) {
                    state.show(text, &mut runs);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    state.show(tj_array_text(items), &mut runs);
                }
            }
            _ => {}
        }
    }

    runs
}

/// Group runs into lines (top to bottom, each sorted left to right), merging runs
/// that abut into a single cell.
fn group_lines(mut runs: Vec<TextRun>) -> Vec<Vec<TextRun>> {
    runs.retain(|run| !run.text.trim().is_empty());
    runs.sort_by(|a, b| {
        b.y.partial_cmp(&a.y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut lines: Vec<Vec<TextRun>> = Vec::new();
    for run in runs {
        match lines.last_mut() {
            Some(line) if (line[0].y - run.y).abs() <= LINE_TOLERANCE => line.push(run),
            _ => lines.push(vec![run]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
            let mut merged: Vec<TextRun> = Vec::with_capacity(line.len());
            for run in line {
                match merged.last_mut() {
                    Some(prev) if run.x - prev.estimated_end() < prev.font_size * MERGE_GAP_FACTOR => {
                        prev.text.push(' ');
                        prev.text.push_str(&run.text);
                    }
                    _ => merged.push(run),
                }
            }
            merged
        })
        .collect()
}

struct TableBlock {
    lines: Vec<Vec<TextRun>>,
    anchors: Vec<f32>,
    last_y: f32,
    font_size: f32,
}

impl TableBlock {
    fn start(line: Vec<TextRun>) -> Self {
        let font_size = line.iter().map(|r| r.font_size).fold(0.0_f32, f32::max);
        let mut block = Self {
            lines: Vec::new(),
            anchors: Vec::new(),
            last_y: line[0].y,
            font_size: if font_size > 0.0 { font_size } else { 1.0 },
        };
        block.push(line);
        block
    }

    fn tolerance(&self) -> f32 {
        self.font_size * ANCHOR_FACTOR
    }

    fn is_aligned(&self, x: f32) -> bool {
        self.anchors.iter().any(|a| (a - x).abs() <= self.tolerance())
    }

    fn accepts(&self, line: &[TextRun]) -> bool {
        let gap = self.last_y - line[0].y;
        if gap > self.font_size * ROW_GAP_FACTOR {
            return false;
        }
        line.len() >= 2 || line.iter().all(|run| self.is_aligned(run.x))
    }

    fn push(&mut self, line: Vec<TextRun>) {
        for run in &line {
            if !self.is_aligned(run.x) {
                self.anchors.push(run.x);
            }
        }
        self.last_y = line[0].y;
        self.lines.push(line);
    }

    fn into_table(mut self) -> ExtractedTable {
        self.anchors
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let anchors = self.anchors;

        self.lines
            .into_iter()
            .map(|line| {
                let mut cells: Vec<Option<String>> = vec![None; anchors.len()];
                for run in line {
                    let column = nearest_anchor(&anchors, run.x);
                    match &mut cells[column] {
                        Some(existing) => {
                            existing.push(' ');
                            existing.push_str(&run.text);
                        }
                        slot => *slot = Some(run.text),
                    }
                }
                cells
            })
            .collect()
    }
}

fn nearest_anchor(anchors: &[f32], x: f32) -> usize {
    anchors
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - x)
                .abs()
                .partial_cmp(&(*b - x).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Tables on one page, top to bottom. A table starts at a line with at least two
/// cells and continues while lines stay close and column-aligned.
pub(super) fn detect_tables(runs: Vec<TextRun>) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut current: Option<TableBlock> = None;

    for line in group_lines(runs) {
        if let Some(block) = current.as_mut() {
            if block.accepts(&line) {
                block.push(line);
                continue;
            }
        }

        if let Some(block) = current.take() {
            tables.push(block.into_table());
        }
        if line.len() >= 2 {
            current = Some(TableBlock::start(line));
        }
    }

    if let Some(block) = current.take() {
        tables.push(block.into_table());
    }
    tables
}

/// First row labels the columns (blank labels become `col<N>`), every later row
/// becomes a field map with blank cells as `""`. Tables without a data row yield
/// nothing.
pub(super) fn table_to_field_maps(table: &ExtractedTable) -> Vec<FieldMap> {
    if table.len() < 2 {
        return Vec::new();
    }

    let headers: Vec<String> = table[0]
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Some(text) if !text.is_empty() => text.trim().to_string(),
            _ => format!("col{}", i),
        })
        .collect();

    table[1..]
        .iter()
        .map(|row| {
            zip_record(
                &headers,
                row.iter().map(|cell| Some(cell.clone().unwrap_or_default())),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::StringFormat;

    fn run(x: f32, y: f32, text: &str) -> TextRun {
        TextRun {
            x,
            y,
            font_size: 10.0,
            text: text.to_string(),
        }
    }

    fn cell(text: &str) -> Option<String> {
        Some(text.to_string())
    }

    fn literal(text: &str) -> Object {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    }

    #[test]
    fn test_header_only_table_yields_nothing() {
        let table: ExtractedTable = vec![vec![cell("a"), cell("b")]];
        assert!(table_to_field_maps(&table).is_empty());
        assert!(table_to_field_maps(&Vec::new()).is_empty());
    }

    #[test]
    fn test_blank_headers_become_col_index() {
        let table: ExtractedTable = vec![
            vec![cell("name"), None, cell(""), cell(" qty ")],
            vec![cell("Ann"), cell("x"), None, cell("3")],
        ];

        let rows = table_to_field_maps(&table);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"].as_deref(), Some("Ann"));
        assert_eq!(rows[0]["col1"].as_deref(), Some("x"));
        assert_eq!(rows[0]["col2"].as_deref(), Some(""));
        assert_eq!(rows[0]["qty"].as_deref(), Some("3"));
    }

    #[test]
    fn test_short_data_row_is_zipped() {
        let table: ExtractedTable = vec![vec![cell("a"), cell("b")], vec![cell("1")]];
        let rows = table_to_field_maps(&table);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0]["a"].as_deref(), Some("1"));
    }

    #[test]
    fn test_detect_tables_aligns_sparse_rows() {
        let runs = vec![
            run(40.0, 700.0, "Quarterly report"),
            run(40.0, 660.0, "amount"),
            run(140.0, 660.0, "date"),
            run(40.0, 640.0, "100"),
            run(140.0, 640.0, "2024-01-01"),
            run(140.0, 620.0, "2024-02-01"),
        ];

        let tables = detect_tables(runs);
        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0],
            vec![
                vec![cell("amount"), cell("date")],
                vec![cell("100"), cell("2024-01-01")],
                vec![None, cell("2024-02-01")],
            ]
        );
    }

    #[test]
    fn test_detect_tables_splits_on_large_gap() {
        let runs = vec![
            run(40.0, 700.0, "a"),
            run(140.0, 700.0, "b"),
            run(40.0, 680.0, "1"),
            run(140.0, 680.0, "2"),
            run(40.0, 500.0, "c"),
            run(140.0, 500.0, "d"),
        ];

        let tables = detect_tables(runs);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].len(), 2);
        assert_eq!(tables[1], vec![vec![cell("c"), cell("d")]]);
    }

    #[test]
    fn test_group_lines_merges_adjacent_words() {
        let lines = group_lines(vec![
            run(40.0, 700.0, "Total"),
            run(68.0, 700.5, "due"),
            run(200.0, 700.0, "42"),
        ]);
        assert_eq!(lines.len(), 1);
        let texts: Vec<&str> = lines[0].iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Total due", "42"]);
    }

    #[test]
    fn test_extract_runs_tracks_positioning() {
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(10)]),
            Operation::new("Td", vec![Object::Integer(40), Object::Integer(700)]),
            Operation::new("Tj", vec![literal("amount")]),
            Operation::new("Td", vec![Object::Integer(100), Object::Integer(0)]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![literal("da"), Object::Integer(-10), literal("te")])],
            ),
            Operation::new("ET", vec![]),
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(1),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(1),
                    Object::Integer(0),
                    Object::Integer(-20),
                ],
            ),
            Operation::new("BT", vec![]),
            Operation::new("Td", vec![Object::Integer(40), Object::Integer(700)]),
            Operation::new("Tj", vec![literal("100")]),
            Operation::new("Tj", vec![literal("0")]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ];

        let runs = extract_runs(&ops);
        assert_eq!(runs.len(), 3);
        assert_eq!((runs[0].x, runs[0].y, runs[0].text.as_str()), (40.0, 700.0, "amount"));
        assert_eq!((runs[1].x, runs[1].y, runs[1].text.as_str()), (140.0, 700.0, "date"));
        assert_eq!((runs[2].x, runs[2].y, runs[2].text.as_str()), (40.0, 680.0, "1000"));
        assert_eq!(runs[0].font_size, 10.0);
    }

    #[test]
    fn test_decode_pdf_string_utf16() {
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_pdf_string(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }
}

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::Workbook;

use crate::enrollment::EnrolledStudent;

pub const COL_STUDENT_ID: &str = "student_id";
pub const COL_FULL_NAME: &str = "full_name";
pub const COL_PARTIAL_1: &str = "partial_1";
pub const COL_PARTIAL_2: &str = "partial_2";
pub const COL_PARTIAL_3: &str = "partial_3";
pub const COL_ORDINARY: &str = "ordinary";
pub const COL_FINAL_GRADE: &str = "final_grade";

pub const IMPORT_COLUMNS: [&str; 6] = [
    COL_STUDENT_ID,
    COL_FULL_NAME,
    COL_PARTIAL_1,
    COL_PARTIAL_2,
    COL_PARTIAL_3,
    COL_ORDINARY,
];

pub const EXPORT_COLUMNS: [&str; 7] = [
    COL_STUDENT_ID,
    COL_FULL_NAME,
    COL_PARTIAL_1,
    COL_PARTIAL_2,
    COL_PARTIAL_3,
    COL_ORDINARY,
    COL_FINAL_GRADE,
];

/// One data record of an uploaded sheet.
#[derive(Debug, Clone)]
pub struct SheetRow {
    /// Spreadsheet line the record starts on; the header is line 1.
    pub line_no: usize,
    pub fields: Vec<String>,
    /// Set when the record could not be read cleanly (unterminated quote).
    pub defect: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

impl Sheet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| self.column_index(c).is_none())
            .map(|c| c.to_string())
            .collect()
    }

    /// First non-blank record becomes the header; blank records are dropped.
    fn from_records(records: Vec<SheetRow>) -> Option<Sheet> {
        let mut records = records.into_iter().filter(|r| !r.is_blank());
        let headers = records
            .next()?
            .fields
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        Some(Sheet {
            headers,
            rows: records.collect(),
        })
    }
}

impl SheetRow {
    fn is_blank(&self) -> bool {
        self.defect.is_none() && self.fields.iter().all(|f| f.trim().is_empty())
    }
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Split CSV text into records. Quoted fields may span line breaks; each
/// record keeps the line it started on. LF, CRLF and lone CR end a record.
pub fn read_csv_records(text: &str) -> Vec<SheetRow> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut start_line = 1;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut buf)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' | '\r' if !in_quotes => {
                fields.push(std::mem::take(&mut buf));
                records.push(SheetRow {
                    line_no: start_line,
                    fields: std::mem::take(&mut fields),
                    defect: None,
                });
                line += 1;
                start_line = line;
            }
            '\n' => {
                buf.push(ch);
                line += 1;
            }
            _ => buf.push(ch),
        }
    }
    if in_quotes || !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        records.push(SheetRow {
            line_no: start_line,
            fields,
            defect: in_quotes.then(|| "unterminated quoted field".to_string()),
        });
    }
    records
}

/// Parse a CSV document with a header line. Returns `None` when there is no
/// header. Blank lines are skipped but still counted for line numbers.
pub fn parse_csv(text: &str) -> Option<Sheet> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    Sheet::from_records(read_csv_records(text))
}

/// Shortest representation that parses back to the same value.
pub fn format_cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

pub fn to_csv(columns: &[&str], rows: &[Vec<String>]) -> String {
    let mut csv = columns.join(",");
    csv.push('\n');
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| csv_quote(c)).collect();
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    csv
}

/// Upload template rows, pre-filled with the current scores of every enrolled
/// student. Columns are [`IMPORT_COLUMNS`].
pub fn template_rows(students: &[EnrolledStudent]) -> Vec<Vec<String>> {
    students
        .iter()
        .map(|s| {
            vec![
                s.key.clone(),
                s.full_name(),
                format_cell(s.inputs.partial_1),
                format_cell(s.inputs.partial_2),
                format_cell(s.inputs.partial_3),
                format_cell(s.inputs.ordinary),
            ]
        })
        .collect()
}

/// Columns are [`EXPORT_COLUMNS`].
pub fn export_rows(students: &[EnrolledStudent]) -> Vec<Vec<String>> {
    students
        .iter()
        .zip(template_rows(students))
        .map(|(s, mut row)| {
            row.push(format_cell(s.final_grade));
            row
        })
        .collect()
}

/// Workbook formats go through calamine / rust_xlsxwriter; anything else is CSV.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "xlsx" | "xlsm" | "xls" | "ods"))
        .unwrap_or(false)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

/// First worksheet of a workbook as a [`Sheet`]. Line numbers are worksheet
/// row numbers, so they match what the instructor sees.
pub fn read_workbook(path: &Path) -> Result<Option<Sheet>, String> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(r) => r.map_err(|e| format!("cannot read {}: {}", path.display(), e))?,
        None => return Ok(None),
    };
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let records = range
        .rows()
        .enumerate()
        .map(|(i, cells)| SheetRow {
            line_no: first_row + i + 1,
            fields: cells.iter().map(cell_text).collect(),
            defect: None,
        })
        .collect();
    Ok(Sheet::from_records(records))
}

/// Read an upload from disk, CSV or workbook by extension.
pub fn read_sheet_file(path: &Path) -> Result<Option<Sheet>, String> {
    if is_workbook(path) {
        return read_workbook(path);
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(parse_csv(&text))
}

/// Write a single-sheet workbook. Score columns (after the name) are written
/// as numbers when they parse as one.
pub fn write_workbook(path: &Path, columns: &[&str], rows: &[Vec<String>]) -> anyhow::Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("grades")?;
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }
    for (r, row) in rows.iter().enumerate() {
        let r = r as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(n) if col >= 2 => sheet.write_number(r, col, n)?,
                _ => sheet.write_string(r, col, cell.as_str())?,
            };
        }
    }
    workbook.save(path)?;
    Ok(())
}

//! Row normalization: first sheet → ordered string records.
//!
//! This is the one place that guarantees every cell reaching the template
//! is a trimmed `String`. Downstream code never sees numbers, booleans,
//! date serials or "missing" values.
//!
//! ## Known limitation: first sheet only
//!
//! Only the first sheet of a workbook is read; later sheets are ignored
//! (a `debug!` line records how many were skipped). Callers who need other
//! sheets must move them to the front.
//!
//! ## Header handling
//!
//! The first non-blank row is the header. Empty header cells become
//! `__EMPTY`, `__EMPTY_1`, …; repeated names get `_1`, `_2`, … suffixes, so
//! every column has a distinct key and every row carries every column.

use crate::error::Sheet2PdfError;
use crate::pipeline::input::ValidatedUpload;
use calamine::{Data, Ods, Reader, Xls, Xlsb, Xlsx};
use chrono::{NaiveDateTime, Timelike};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// One data row: `(column, value)` pairs in header order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedRow {
    cells: Vec<(String, String)>,
}

impl NormalizedRow {
    pub fn new(cells: Vec<(String, String)>) -> Self {
        Self { cells }
    }

    /// Value of `column`, if the row has it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Values in header order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(_, v)| v.as_str())
    }

    pub fn cells(&self) -> &[(String, String)] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True when every value is the empty string.
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.is_empty())
    }
}

/// The normalized content of a workbook's first sheet.
#[derive(Debug, Clone, Default)]
pub struct SheetData {
    /// Name of the sheet that was read (empty for CSV).
    pub sheet_name: String,
    /// Column keys, in sheet order.
    pub columns: Vec<String>,
    /// Data rows, header excluded, in sheet order.
    pub rows: Vec<NormalizedRow>,
    /// Sheets after the first that were not read.
    pub ignored_sheets: usize,
}

/// Coerce a raw textual cell value. Idempotent.
pub fn normalize_value(raw: &str) -> String {
    raw.trim().to_string()
}

/// Parse the upload's first sheet on a blocking thread.
pub async fn normalize(upload: &ValidatedUpload) -> Result<SheetData, Sheet2PdfError> {
    let path = upload.path.clone();
    let extension = upload.extension.clone();

    tokio::task::spawn_blocking(move || read_first_sheet(&path, &extension))
        .await
        .map_err(|e| Sheet2PdfError::Internal(format!("Normalize task panicked: {}", e)))?
}

/// Blocking implementation of [`normalize`].
pub fn read_first_sheet(path: &Path, extension: &str) -> Result<SheetData, Sheet2PdfError> {
    let (sheet_name, grid, ignored_sheets) = match extension {
        ".csv" => ("".to_string(), read_csv(path)?, 0),
        ".xlsx" | ".xlsm" => read_workbook::<Xlsx<_>>(path)?,
        ".xlsb" => read_workbook::<Xlsb<_>>(path)?,
        ".xls" => read_workbook::<Xls<_>>(path)?,
        ".ods" => read_workbook::<Ods<_>>(path)?,
        other => {
            return Err(Sheet2PdfError::Unreadable {
                path: path.to_path_buf(),
                detail: format!("no reader for '{other}' files"),
            })
        }
    };

    let mut data = rows_from_grid(grid);
    data.sheet_name = sheet_name;
    data.ignored_sheets = ignored_sheets;

    info!(
        "Normalized {} rows × {} columns from {}",
        data.rows.len(),
        data.columns.len(),
        path.display()
    );
    Ok(data)
}

/// Open a workbook with reader `R` and stringify its first sheet.
fn read_workbook<R>(path: &Path) -> Result<(String, Vec<Vec<String>>, usize), Sheet2PdfError>
where
    R: Reader<BufReader<File>>,
    R::Error: std::fmt::Display,
{
    let unreadable = |detail: String| Sheet2PdfError::Unreadable {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut workbook = R::new(BufReader::new(file)).map_err(|e| unreadable(e.to_string()))?;

    let names = workbook.sheet_names();
    let Some(first) = names.first().cloned() else {
        return Err(Sheet2PdfError::NoSheets {
            path: path.to_path_buf(),
        });
    };
    if names.len() > 1 {
        debug!(
            "Reading sheet '{}' only; ignoring {} further sheet(s)",
            first,
            names.len() - 1
        );
    }

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Sheet2PdfError::NoSheets {
            path: path.to_path_buf(),
        })?
        .map_err(|e| unreadable(e.to_string()))?;

    let grid = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    Ok((first, grid, names.len() - 1))
}

/// Read a CSV file as a grid of trimmed strings.
///
/// Invalid UTF-8 is replaced rather than rejected; spreadsheets exported from
/// legacy tools are often Latin-1.
fn read_csv(path: &Path) -> Result<Vec<Vec<String>>, Sheet2PdfError> {
    let file = File::open(path).map_err(|e| Sheet2PdfError::Unreadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    read_csv_from(file).map_err(|e| Sheet2PdfError::Unreadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn read_csv_from<R: Read>(reader: R) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut grid: Vec<Vec<String>> = Vec::new();
    for record in rdr.byte_records() {
        let record = record?;
        grid.push(
            record
                .iter()
                .map(|field| normalize_value(&String::from_utf8_lossy(field)))
                .collect(),
        );
    }
    if let Some(first) = grid.first_mut().and_then(|row| row.first_mut()) {
        *first = normalize_value(first.trim_start_matches('\u{feff}'));
    }
    Ok(grid)
}

/// Coerce one calamine cell to display text.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => normalize_value(s),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Data::DateTime(dt) => {
            if dt.is_duration() {
                format_number(dt.as_f64())
            } else {
                dt.as_datetime()
                    .map(format_datetime)
                    .unwrap_or_else(|| format_number(dt.as_f64()))
            }
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => normalize_value(s),
    }
}

/// Print a number the way a spreadsheet's "General" format would:
/// integral values without a fractional part, others with at most ten
/// decimals and no trailing zeros.
fn format_number(f: f64) -> String {
    if !f.is_finite() {
        return String::new();
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        return format!("{}", f as i64);
    }
    let s = format!("{:.10}", f);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Dates print as `YYYY-MM-DD`; a time part is appended only when present.
fn format_datetime(dt: NaiveDateTime) -> String {
    if dt.time().num_seconds_from_midnight() == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Split a grid into header + data rows.
fn rows_from_grid(grid: Vec<Vec<String>>) -> SheetData {
    let mut rows_iter = grid
        .into_iter()
        .filter(|row| row.iter().any(|v| !v.is_empty()));

    let Some(header) = rows_iter.next() else {
        return SheetData::default();
    };
    let body: Vec<Vec<String>> = rows_iter.collect();

    let width = body
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0);

    let mut raw_header = header;
    raw_header.resize(width, String::new());
    let columns = unique_headers(&raw_header);

    let rows = body
        .into_iter()
        .map(|mut values| {
            values.resize(width, String::new());
            NormalizedRow::new(columns.iter().cloned().zip(values).collect())
        })
        .collect();

    SheetData {
        columns,
        rows,
        ..SheetData::default()
    }
}

/// Give every header cell a distinct, non-empty key.
fn unique_headers(raw: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    raw.iter()
        .map(|h| {
            let base = if h.is_empty() { "__EMPTY" } else { h.as_str() };
            let mut candidate = base.to_string();
            let mut n = 0;
            while used.contains(&candidate) {
                n += 1;
                candidate = format!("{base}_{n}");
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}

//! Tabular source reader.
//!
//! Loads one stage's worth of rows from a spreadsheet (first worksheet) or a
//! delimited text file into a [`RowSet`]. Column types are inferred from the
//! content: spreadsheet cells keep the type the workbook recorded, with
//! all-integral numeric columns narrowed to integers; delimited files are
//! sampled in full before parsing.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{
    data::{
        Value, excel_serial_to_value, infer_column_types, parse_naive_date, parse_naive_datetime,
        parse_typed_value,
    },
    error::LoadError,
    io_utils,
    rows::{Cell, RowSet},
};

/// Extensions probed, in order, when locating a stage's source by stem.
pub const SOURCE_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods", "csv", "tsv"];

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub encoding: &'static Encoding,
    pub delimiter: Option<u8>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            delimiter: None,
        }
    }
}

/// Finds `<dir>/<stem>.<ext>` for the first extension in
/// [`SOURCE_EXTENSIONS`] that exists.
pub fn locate(dir: &Path, stem: &str) -> Result<PathBuf, LoadError> {
    SOURCE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| LoadError::SourceNotFound {
            path: dir.join(format!("{stem}.{}", SOURCE_EXTENSIONS[0])),
        })
}

pub fn read_row_set(path: &Path, options: &ReadOptions) -> Result<RowSet, LoadError> {
    if !path.exists() {
        return Err(LoadError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let rows = if WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
        read_workbook(path)?
    } else if DELIMITED_EXTENSIONS.contains(&extension.as_str()) {
        read_delimited(path, options)?
    } else {
        return Err(LoadError::unreadable(
            path,
            format!("unsupported file extension '{extension}'"),
        ));
    };
    debug!(
        "Read {} row(s) x {} column(s) from {:?}",
        rows.len(),
        rows.columns().len(),
        path
    );
    Ok(rows)
}

fn read_workbook(path: &Path) -> Result<RowSet, LoadError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| LoadError::unreadable(path, err))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::unreadable(path, "workbook has no worksheets"))?
        .map_err(|err| LoadError::unreadable(path, err))?;

    let mut sheet_rows = range.rows();
    let Some(header) = sheet_rows.next() else {
        return Ok(RowSet::default());
    };
    let (columns, synthetic) = header_names(header.iter().map(header_text));
    ensure_unique_headers(path, &columns)?;

    let mut set = RowSet::new(columns);
    for row in sheet_rows {
        let cells: Vec<Cell> = row.iter().map(cell_to_value).collect();
        if cells.iter().all(|cell| is_blank(cell)) {
            continue;
        }
        set.push(cells);
    }
    Ok(narrow_integral_columns(drop_unnamed_empty(set, &synthetic)))
}

fn read_delimited(path: &Path, options: &ReadOptions) -> Result<RowSet, LoadError> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)
        .map_err(|err| LoadError::unreadable(path, format!("{err:#}")))?;
    let raw_headers = io_utils::reader_headers(&mut reader, options.encoding)
        .map_err(|err| LoadError::unreadable(path, format!("{err:#}")))?;
    let (columns, synthetic) = header_names(raw_headers.into_iter());
    ensure_unique_headers(path, &columns)?;

    let mut raw_rows = Vec::new();
    for (row_idx, record) in reader.byte_records().enumerate() {
        let record = record.map_err(|err| {
            LoadError::unreadable(path, format!("row {}: {err}", row_idx + 2))
        })?;
        let decoded = io_utils::decode_record(&record, options.encoding)
            .map_err(|err| LoadError::unreadable(path, format!("row {}: {err:#}", row_idx + 2)))?;
        if decoded.iter().all(|field| field.is_empty()) {
            continue;
        }
        raw_rows.push(decoded);
    }

    let types = infer_column_types(columns.len(), &raw_rows);
    let mut set = RowSet::new(columns);
    for (row_idx, raw) in raw_rows.iter().enumerate() {
        let cells = raw
            .iter()
            .zip(types.iter())
            .map(|(field, ty)| parse_typed_value(field, *ty))
            .collect::<anyhow::Result<Vec<Cell>>>()
            .map_err(|err| LoadError::unreadable(path, format!("row {}: {err:#}", row_idx + 2)))?;
        set.push(cells);
    }
    Ok(drop_unnamed_empty(set, &synthetic))
}

/// Names blank header cells `col_<n>` (1-based) and reports which names were
/// synthesized.
fn header_names(raw: impl Iterator<Item = String>) -> (Vec<String>, Vec<String>) {
    let mut synthetic = Vec::new();
    let columns = raw
        .enumerate()
        .map(|(idx, name)| {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                let generated = format!("col_{}", idx + 1);
                synthetic.push(generated.clone());
                generated
            } else {
                trimmed.to_string()
            }
        })
        .collect();
    (columns, synthetic)
}

fn ensure_unique_headers(path: &Path, columns: &[String]) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(LoadError::unreadable(
                path,
                format!("duplicate column header '{column}'"),
            ));
        }
    }
    Ok(())
}

/// Unnamed columns that hold no data are formatting residue, not content.
fn drop_unnamed_empty(set: RowSet, synthetic: &[String]) -> RowSet {
    let residue: Vec<&str> = synthetic
        .iter()
        .filter(|name| set.column_values(name).all(|cell| cell.is_none()))
        .map(String::as_str)
        .collect();
    if residue.is_empty() {
        set
    } else {
        set.without_columns(&residue)
    }
}

/// Spreadsheets store every number as a float; a column whose numbers are all
/// integral is read as an integer column.
fn narrow_integral_columns(set: RowSet) -> RowSet {
    let integral: Vec<bool> = (0..set.columns().len())
        .map(|idx| {
            let mut saw_float = false;
            let all_integral = set.rows().iter().all(|row| match &row[idx] {
                Some(Value::Float(f)) => {
                    saw_float = true;
                    f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64
                }
                Some(Value::Integer(_)) | None => true,
                Some(_) => false,
            });
            saw_float && all_integral
        })
        .collect();
    if !integral.contains(&true) {
        return set;
    }
    let mut idx = 0usize;
    let width = integral.len();
    set.map_cells(|cell| {
        let narrow = integral[idx % width];
        idx += 1;
        match cell {
            Some(Value::Float(f)) if narrow => Some(Value::Integer(*f as i64)),
            other => other.clone(),
        }
    })
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn cell_to_value(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Int(i) => Some(Value::Integer(*i)),
        Data::Float(f) => Some(Value::Float(*f)),
        Data::Bool(b) => Some(Value::Boolean(*b)),
        Data::DateTime(dt) if dt.is_duration() => Some(Value::Float(dt.as_f64())),
        Data::DateTime(dt) => excel_serial_to_value(dt.as_f64()),
        Data::DateTimeIso(s) => Some(
            parse_naive_datetime(s)
                .map(Value::DateTime)
                .or_else(|_| parse_naive_date(s).map(Value::Date))
                .unwrap_or_else(|_| Value::String(s.clone())),
        ),
        Data::DurationIso(s) => Some(Value::String(s.clone())),
    }
}

fn is_blank(cell: &Cell) -> bool {
    match cell {
        None => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// A single cell. Absence is expressed as `Option::<Value>::None`, never as a
/// variant of this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// True for values that stand in for a missing cell: NaN floats and empty
    /// strings.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Float(f) => f.is_nan(),
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    possible_integer: bool,
    possible_float: bool,
    possible_boolean: bool,
    observed: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            possible_integer: true,
            possible_float: true,
            possible_boolean: true,
            observed: false,
        }
    }

    fn observe(&mut self, value: &str) {
        self.observed = true;
        if self.possible_boolean && parse_boolean(value).is_none() {
            self.possible_boolean = false;
        }
        if self.possible_integer && value.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && value.parse::<f64>().is_err() {
            self.possible_float = false;
        }
    }

    fn decide(&self) -> ColumnType {
        if !self.observed {
            ColumnType::String
        } else if self.possible_boolean {
            ColumnType::Boolean
        } else if self.possible_integer {
            ColumnType::Integer
        } else if self.possible_float {
            ColumnType::Float
        } else {
            ColumnType::String
        }
    }
}

/// Infers one [`ColumnType`] per column from raw text rows. Empty cells do not
/// vote; a column with no non-empty cell is a string column. Only numbers and
/// the words `true`/`false` are typed; everything else, date-like text
/// included, stays the text the file holds.
pub fn infer_column_types(width: usize, rows: &[Vec<String>]) -> Vec<ColumnType> {
    let mut candidates = vec![TypeCandidate::new(); width];
    for row in rows {
        for (idx, field) in row.iter().enumerate().take(width) {
            if field.is_empty() {
                continue;
            }
            candidates[idx].observe(field);
        }
    }
    candidates.iter().map(TypeCandidate::decide).collect()
}

fn parse_boolean(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn parse_typed_value(value: &str, ty: ColumnType) -> Result<Option<Value>> {
    if value.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        ColumnType::String => Value::String(value.to_string()),
        ColumnType::Integer => {
            let parsed: i64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as integer"))?;
            Value::Integer(parsed)
        }
        ColumnType::Float => {
            let parsed: f64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as float"))?;
            Value::Float(parsed)
        }
        ColumnType::Boolean => Value::Boolean(
            parse_boolean(value).ok_or_else(|| anyhow!("Failed to parse '{value}' as boolean"))?,
        ),
    };
    Ok(Some(parsed))
}

/// Converts a spreadsheet serial date (days since 1899-12-30, fractional part
/// is time of day) into a date or datetime. Midnight values become plain dates.
pub fn excel_serial_to_value(serial: f64) -> Option<Value> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    let date = epoch.checked_add_signed(Duration::days(days))?;
    let datetime = date.and_time(NaiveTime::MIN) + Duration::seconds(seconds);
    if datetime.time() == NaiveTime::MIN {
        Some(Value::Date(datetime.date()))
    } else {
        Some(Value::DateTime(datetime))
    }
}

//! Record model and CSV loading using Polars

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use polars::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::schema::DatasetKind;

/// Markers parsed as missing values in any column.
const NULL_MARKERS: &[&str] = &[
    "NA", "N/A", "na", "n/a", "null", "NULL", "None", "none", "NaN", "nan", "#N/A",
];

/// Formats accepted for timestamp columns, tried in order after RFC 3339.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

static MISSING: Value = Value::Missing;

/// A single cell value. `Missing` is never coerced to zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Missing,
}

impl Value {
    /// Numeric view of the value; only integers and floats are numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Canonical string form used for distinct counts and modes.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Missing => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Missing => f.write_str(""),
        }
    }
}

/// Mapping from column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    values: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    /// Value of `column`; absent columns read as missing.
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&MISSING)
    }

    pub fn numeric(&self, column: &str) -> Option<f64> {
        self.get(column).as_f64()
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).as_str()
    }

    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.get(column).as_timestamp()
    }
}

/// Parsed tabular structure: ordered columns and records sharing them.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl Table {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parse the text values of `column` into timestamps. Values that do not
    /// parse become missing; the number of such values is returned.
    pub fn coerce_timestamps(&mut self, column: &str) -> usize {
        if !self.columns.iter().any(|c| c == column) {
            return 0;
        }

        let mut unparsed = 0;
        for record in &mut self.records {
            let parsed = match record.get(column) {
                Value::Text(s) => parse_timestamp(s),
                Value::Timestamp(ts) => Some(*ts),
                Value::Missing => continue,
                _ => None,
            };
            match parsed {
                Some(ts) => record.insert(column, Value::Timestamp(ts)),
                None => {
                    unparsed += 1;
                    record.insert(column, Value::Missing);
                }
            }
        }
        unparsed
    }

    /// Coerce `column` to numbers cell by cell. Integers and finite floats
    /// are kept, numeric text is parsed, and anything else (words,
    /// infinities, timestamps) becomes missing. Returns the number of cells
    /// that were made missing.
    pub fn coerce_numeric(&mut self, column: &str) -> usize {
        if !self.columns.iter().any(|c| c == column) {
            return 0;
        }

        let mut invalid = 0;
        for record in &mut self.records {
            let coerced = match record.get(column) {
                Value::Missing | Value::Integer(_) => continue,
                Value::Float(v) if v.is_finite() => continue,
                Value::Text(s) => parse_number(s),
                Value::Float(_) | Value::Timestamp(_) => None,
            };
            match coerced {
                Some(value) => record.insert(column, value),
                None => {
                    invalid += 1;
                    record.insert(column, Value::Missing);
                }
            }
        }
        invalid
    }
}

/// A named dataset held by the store.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub kind: DatasetKind,
    pub columns: Vec<String>,
    pub records: Vec<Record>,
    pub loaded_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, kind: DatasetKind, table: Table) -> Self {
        Self {
            name: name.into(),
            kind,
            columns: table.columns,
            records: table.records,
            loaded_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Parse raw CSV bytes into a [`Table`].
///
/// Undecodable bytes, empty input and malformed structure are reported as
/// [`Error::StructuralParse`].
pub fn load_csv(raw: &[u8]) -> Result<Table> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::StructuralParse(format!("input is not valid UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Err(Error::StructuralParse("input is empty".to_string()));
    }

    let null_values = NullValues::AllColumns(NULL_MARKERS.iter().map(|m| (*m).into()).collect());
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(CsvParseOptions::default().with_null_values(Some(null_values)))
        .into_reader_with_file_handle(Cursor::new(raw.to_vec()))
        .finish()?;

    table_from_frame(&df)
}

/// Convert a Polars frame into row records.
fn table_from_frame(df: &DataFrame) -> Result<Table> {
    let columns: Vec<String> = df.get_columns().iter().map(|s| s.name().to_string()).collect();

    let mut records = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let mut record = Record::new();
        for (name, series) in columns.iter().zip(df.get_columns()) {
            record.insert(name.clone(), value_from_any(series.get(row)?));
        }
        records.push(record);
    }

    Ok(Table { columns, records })
}

fn value_from_any(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Missing,
        AnyValue::Boolean(b) => Value::Integer(i64::from(b)),
        AnyValue::Int8(v) => Value::Integer(v.into()),
        AnyValue::Int16(v) => Value::Integer(v.into()),
        AnyValue::Int32(v) => Value::Integer(v.into()),
        AnyValue::Int64(v) => Value::Integer(v),
        AnyValue::UInt8(v) => Value::Integer(v.into()),
        AnyValue::UInt16(v) => Value::Integer(v.into()),
        AnyValue::UInt32(v) => Value::Integer(v.into()),
        AnyValue::UInt64(v) => i64::try_from(v)
            .map(Value::Integer)
            .unwrap_or(Value::Float(v as f64)),
        AnyValue::Float32(v) => float_value(v.into()),
        AnyValue::Float64(v) => float_value(v),
        AnyValue::String(s) => Value::Text(s.to_string()),
        AnyValue::StringOwned(s) => Value::Text(s.to_string()),
        other => Value::Text(other.to_string()),
    }
}

fn float_value(v: f64) -> Value {
    if v.is_nan() {
        Value::Missing
    } else {
        Value::Float(v)
    }
}

fn parse_number(input: &str) -> Option<Value> {
    let input = input.trim();
    if let Ok(v) = input.parse::<i64>() {
        return Some(Value::Integer(v));
    }
    input
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Value::Float)
}

/// Parse a timestamp from RFC 3339, a naive date-time or a plain date.
/// Naive values are interpreted as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

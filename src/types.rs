use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub const ROW: &str = "row";
pub const VARCHAR: &str = "varchar";
pub const CHAR: &str = "char";
pub const JSON: &str = "json";
pub const BIGINT: &str = "bigint";
pub const INTEGER: &str = "integer";
pub const SMALLINT: &str = "smallint";
pub const TINYINT: &str = "tinyint";
pub const BOOLEAN: &str = "boolean";
pub const DOUBLE: &str = "double";
pub const REAL: &str = "real";
pub const DECIMAL: &str = "decimal";
pub const DATE: &str = "date";
pub const TIME: &str = "time";
pub const TIME_WITH_TIME_ZONE: &str = "time with time zone";
pub const TIMESTAMP: &str = "timestamp";
pub const TIMESTAMP_WITH_TIME_ZONE: &str = "timestamp with time zone";

pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Accepts any number of fractional second digits, including none.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// Length of `YYYY-MM-DD HH:MM:SS.fff`; anything this short has no zone suffix.
const TIMESTAMP_TEXT_LEN: usize = 23;

/// A converted column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    Double(f64),
    /// Midnight UTC of the calendar date.
    Date(DateTime<Utc>),
    Timestamp(DateTime<Utc>),
    TimestampWithZone(DateTime<FixedOffset>),
    /// Structured value passed through as received.
    Raw(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.3f")),
            Value::TimestampWithZone(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.3f %:z")),
            Value::Raw(v) => write!(f, "{v}"),
        }
    }
}

/// A raw value that could not be coerced to its column's type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to convert {value} ({kind}) into type {target}")]
pub struct TypeConversionError {
    pub value: JsonValue,
    pub kind: &'static str,
    pub target: &'static str,
}

impl TypeConversionError {
    fn new(value: &JsonValue, target: &'static str) -> Self {
        Self {
            value: value.clone(),
            kind: json_kind(value),
            target,
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// The closed set of conversions a column can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// Structs are not flattened; the raw JSON is returned as-is.
    Row,
    String,
    Integer,
    Boolean,
    Double,
    Date,
    Timestamp,
    TimestampWithZone,
}

type Matcher = fn(&str) -> bool;

/// Classification rules, checked in order. First match wins.
const RULES: &[(Matcher, Converter)] = &[
    (|t: &str| t.starts_with(ROW), Converter::Row),
    (|t: &str| t.starts_with(VARCHAR) || t.starts_with(CHAR), Converter::String),
    (|t: &str| t == JSON, Converter::String),
    (
        |t: &str| t == BIGINT || t == INTEGER || t == SMALLINT || t == TINYINT,
        Converter::Integer,
    ),
    (|t: &str| t == BOOLEAN, Converter::Boolean),
    (|t: &str| t == DOUBLE || t == REAL, Converter::Double),
    // Text keeps decimal precision intact.
    (|t: &str| t.starts_with(DECIMAL), Converter::String),
    (|t: &str| t == DATE, Converter::Date),
    // No date part to anchor a time-of-day to.
    (|t: &str| t == TIME || t == TIME_WITH_TIME_ZONE, Converter::String),
    (|t: &str| t == TIMESTAMP, Converter::Timestamp),
    (|t: &str| t == TIMESTAMP_WITH_TIME_ZONE, Converter::TimestampWithZone),
];

impl Converter {
    /// Picks the converter for a declared column type. Unknown types fall
    /// back to [`Converter::String`] with a warning.
    pub fn for_type(column_type: &str) -> Converter {
        RULES
            .iter()
            .find(|(matches, _)| matches(column_type))
            .map(|(_, converter)| *converter)
            .unwrap_or_else(|| {
                warn!("unsupported column type: {}", column_type);
                Converter::String
            })
    }

    /// Name of the native type this converter produces, used in errors.
    pub fn target(self) -> &'static str {
        match self {
            Converter::Row => "row",
            Converter::String => "string",
            Converter::Integer => "i64",
            Converter::Boolean => "bool",
            Converter::Double => "f64",
            Converter::Date => "date",
            Converter::Timestamp | Converter::TimestampWithZone => "timestamp",
        }
    }

    /// Converts one raw value. Null always converts to [`Value::Null`].
    pub fn convert(self, raw: &JsonValue) -> Result<Value, TypeConversionError> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Converter::Row => Ok(Value::Raw(raw.clone())),
            Converter::String => Ok(Value::String(to_text(raw))),
            Converter::Integer => convert_integer(raw),
            Converter::Boolean => convert_boolean(raw),
            Converter::Double => convert_double(raw),
            Converter::Date => convert_date(raw),
            Converter::Timestamp => convert_timestamp(raw),
            Converter::TimestampWithZone => convert_timestamp_with_zone(raw),
        }
    }
}

fn to_text(raw: &JsonValue) -> String {
    match raw {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// JSON numbers arrive as floats; integer columns truncate.
fn convert_integer(raw: &JsonValue) -> Result<Value, TypeConversionError> {
    match raw {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Value::Integer)
            .ok_or_else(|| TypeConversionError::new(raw, Converter::Integer.target())),
        _ => Err(TypeConversionError::new(raw, Converter::Integer.target())),
    }
}

fn convert_boolean(raw: &JsonValue) -> Result<Value, TypeConversionError> {
    let parsed = match raw {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => match s.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
            _ => None,
        },
        JsonValue::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Some(true),
            Some(v) if v == 0.0 => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed
        .map(Value::Boolean)
        .ok_or_else(|| TypeConversionError::new(raw, Converter::Boolean.target()))
}

fn convert_double(raw: &JsonValue) -> Result<Value, TypeConversionError> {
    let parsed = match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => match s.as_str() {
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            "NaN" => Some(f64::NAN),
            _ => None,
        },
        _ => None,
    };
    parsed
        .map(Value::Double)
        .ok_or_else(|| TypeConversionError::new(raw, Converter::Double.target()))
}

// Dates and timestamps are read as UTC, not in the session time zone.
fn convert_date(raw: &JsonValue) -> Result<Value, TypeConversionError> {
    raw.as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Value::Date(dt.and_utc()))
        .ok_or_else(|| TypeConversionError::new(raw, Converter::Date.target()))
}

fn convert_timestamp(raw: &JsonValue) -> Result<Value, TypeConversionError> {
    raw.as_str()
        .and_then(|s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok())
        .map(|dt| Value::Timestamp(dt.and_utc()))
        .ok_or_else(|| TypeConversionError::new(raw, Converter::Timestamp.target()))
}

fn convert_timestamp_with_zone(raw: &JsonValue) -> Result<Value, TypeConversionError> {
    let Some(text) = raw.as_str() else {
        return Err(TypeConversionError::new(raw, Converter::TimestampWithZone.target()));
    };
    if text.len() <= TIMESTAMP_TEXT_LEN {
        return convert_timestamp(raw);
    }
    let Some(split) = text.rfind(' ') else {
        return convert_timestamp(raw);
    };

    let err = || TypeConversionError::new(raw, Converter::TimestampWithZone.target());
    // A long zone-less value splits inside itself and is handled as plain.
    let Ok(local) = NaiveDateTime::parse_from_str(&text[..split], TIMESTAMP_FORMAT) else {
        return convert_timestamp(raw);
    };
    let zone = text[split..].trim();

    let instant = if let Some(offset) = parse_offset(zone) {
        offset.from_local_datetime(&local).single()
    } else {
        let tz: Tz = zone.parse().map_err(|_| err())?;
        tz.from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.fixed_offset())
    };
    instant.map(Value::TimestampWithZone).ok_or_else(err)
}

/// Parses `+HH:MM`, `-HHMM` or `+HH`.
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let sign = match zone.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits: String = zone[1..].chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

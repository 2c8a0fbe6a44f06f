use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Declared type of a column in a [`DataSchema`](crate::DataSchema).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnDataType {
    Int,
    Long,
    Float,
    Double,
    /// Stored as an `Int` of 0 or 1.
    Boolean,
    /// Stored as a `Long` of epoch milliseconds.
    Timestamp,
    String,
    Bytes,
}

/// A single cell value.
///
/// Values decoded straight from a [`DataBlock`](crate::DataBlock) use the
/// stored representation of their column type; [`ColumnDataType::convert_and_format`]
/// turns them into the external representation returned to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl ColumnDataType {
    /// Converts a raw value into the external representation of this type.
    ///
    /// Numeric values widen into wider numeric types, booleans stored as
    /// integers become booleans, timestamps are rendered in UTC and bytes are
    /// rendered as lowercase hex. Nulls pass through untouched.
    pub fn convert_and_format(&self, value: Value) -> Result<Value> {
        use ColumnDataType as T;

        let converted = match (self, value) {
            (_, Value::Null) => Value::Null,
            (T::Int, Value::Int(v)) => Value::Int(v),
            (T::Long, Value::Int(v)) => Value::Long(i64::from(v)),
            (T::Long, Value::Long(v)) => Value::Long(v),
            (T::Float, Value::Int(v)) => Value::Float(v as f32),
            (T::Float, Value::Float(v)) => Value::Float(v),
            (T::Double, Value::Int(v)) => Value::Double(f64::from(v)),
            (T::Double, Value::Long(v)) => Value::Double(v as f64),
            (T::Double, Value::Float(v)) => Value::Double(f64::from(v)),
            (T::Double, Value::Double(v)) => Value::Double(v),
            (T::Boolean, Value::Boolean(v)) => Value::Boolean(v),
            (T::Boolean, Value::Int(v @ (0 | 1))) => Value::Boolean(v == 1),
            (T::Timestamp, Value::Long(millis)) => Value::String(format_timestamp(millis)?),
            (T::Bytes, Value::Bytes(bytes)) => Value::String(to_hex(&bytes)),
            (T::String, Value::String(s)) => Value::String(s),
            (
                T::String,
                v @ (Value::Int(_)
                | Value::Long(_)
                | Value::Float(_)
                | Value::Double(_)
                | Value::Boolean(_)),
            ) => Value::String(v.to_string()),
            (target, value) => {
                return Err(Error::TypeConversion {
                    value: value.to_string(),
                    target: *target,
                })
            }
        };
        Ok(converted)
    }
}

impl fmt::Display for ColumnDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnDataType::Int => "INT",
            ColumnDataType::Long => "LONG",
            ColumnDataType::Float => "FLOAT",
            ColumnDataType::Double => "DOUBLE",
            ColumnDataType::Boolean => "BOOLEAN",
            ColumnDataType::Timestamp => "TIMESTAMP",
            ColumnDataType::String => "STRING",
            ColumnDataType::Bytes => "BYTES",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => f.write_str(&to_hex(v)),
        }
    }
}

fn format_timestamp(millis: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .ok_or_else(|| Error::TypeConversion {
            value: millis.to_string(),
            target: ColumnDataType::Timestamp,
        })
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

//! The type registry: logical column kinds and their storage representations.
//!
//! Every logical value is a [`serde_json::Value`]. On the way into SQLite it
//! becomes a [`StorageValue`], which is one of null, integer, real or text.
//! Dates are kept as integer milliseconds since the Unix epoch, structured
//! values (arrays, objects, json) as their JSON text.

// used for persistence
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// used for the date kind
use chrono::{DateTime, SecondsFormat, Utc};

use serde_json::{Number, Value};

// used to print out readable forms of a kind or storage value
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TroveError};

// ------------- ColumnKind -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnKind {
    #[default]
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    Json,
    Increments,
}

impl ColumnKind {
    pub const ALL: [ColumnKind; 8] = [
        ColumnKind::String,
        ColumnKind::Number,
        ColumnKind::Boolean,
        ColumnKind::Date,
        ColumnKind::Array,
        ColumnKind::Object,
        ColumnKind::Json,
        ColumnKind::Increments,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ColumnKind::String => "string",
            ColumnKind::Number => "number",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Date => "date",
            ColumnKind::Array => "array",
            ColumnKind::Object => "object",
            ColumnKind::Json => "json",
            ColumnKind::Increments => "increments",
        }
    }

    /// The declared SQLite column type used when creating a model's table.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::String => "text",
            // no affinity: integers and reals keep their storage class
            ColumnKind::Number => "blob",
            ColumnKind::Boolean => "integer",
            ColumnKind::Date => "integer",
            ColumnKind::Array | ColumnKind::Object | ColumnKind::Json => "text",
            ColumnKind::Increments => "integer primary key autoincrement",
        }
    }

    pub fn to_storage(&self, column: &str, value: &Value) -> Result<StorageValue> {
        if value.is_null() {
            return Ok(StorageValue::Null);
        }
        match self {
            ColumnKind::String => Ok(StorageValue::Text(match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            })),
            ColumnKind::Number => number_to_storage(column, value),
            ColumnKind::Increments => match number_to_storage(column, value)? {
                StorageValue::Real(f) if f.fract() == 0.0 => Ok(StorageValue::Integer(f as i64)),
                StorageValue::Real(f) => Err(TroveError::type_error(
                    column,
                    format!("{f} is not a valid key"),
                )),
                integer => Ok(integer),
            },
            ColumnKind::Boolean => {
                let flag = match value {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                    Value::String(s) => match s.trim().to_lowercase().as_str() {
                        "true" | "1" => true,
                        "false" | "0" | "" => false,
                        _ => {
                            return Err(TroveError::type_error(
                                column,
                                format!("'{s}' is not a boolean"),
                            ));
                        }
                    },
                    other => {
                        return Err(TroveError::type_error(
                            column,
                            format!("{other} is not a boolean"),
                        ));
                    }
                };
                Ok(StorageValue::Integer(flag as i64))
            }
            ColumnKind::Date => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|d| StorageValue::Integer(d.with_timezone(&Utc).timestamp_millis()))
                    .map_err(|e| TroveError::type_error(column, format!("'{s}' is not a date: {e}"))),
                Value::Number(n) => {
                    let millis = n
                        .as_i64()
                        .or_else(|| n.as_f64().map(|f| f as i64))
                        .ok_or_else(|| TroveError::type_error(column, format!("{n} is not a date")))?;
                    date(column, millis)?;
                    Ok(StorageValue::Integer(millis))
                }
                other => Err(TroveError::type_error(column, format!("{other} is not a date"))),
            },
            ColumnKind::Array | ColumnKind::Object | ColumnKind::Json => {
                Ok(StorageValue::Text(value.to_string()))
            }
        }
    }

    pub fn from_storage(&self, column: &str, value: StorageValue) -> Result<Value> {
        if let StorageValue::Null = value {
            return Ok(Value::Null);
        }
        match self {
            ColumnKind::String => Ok(Value::String(match value {
                StorageValue::Text(s) => s,
                StorageValue::Integer(i) => i.to_string(),
                StorageValue::Real(f) => f.to_string(),
                StorageValue::Null => unreachable!("null handled above"),
            })),
            ColumnKind::Number => match value {
                StorageValue::Integer(i) => Ok(Value::from(i)),
                StorageValue::Real(f) => real_to_json(column, f),
                StorageValue::Text(s) => {
                    if let Ok(i) = s.trim().parse::<i64>() {
                        Ok(Value::from(i))
                    } else {
                        let f = s.trim().parse::<f64>().map_err(|_| {
                            TroveError::type_error(column, format!("'{s}' is not a number"))
                        })?;
                        real_to_json(column, f)
                    }
                }
                StorageValue::Null => Ok(Value::Null),
            },
            ColumnKind::Increments => match value {
                StorageValue::Integer(i) => Ok(Value::from(i)),
                StorageValue::Real(f) => Ok(Value::from(f as i64)),
                StorageValue::Text(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| {
                    TroveError::type_error(column, format!("'{s}' is not a key"))
                }),
                StorageValue::Null => Ok(Value::Null),
            },
            ColumnKind::Boolean => Ok(Value::Bool(match value {
                StorageValue::Integer(i) => i != 0,
                StorageValue::Real(f) => f != 0.0,
                StorageValue::Text(s) => !matches!(s.trim().to_lowercase().as_str(), "" | "0" | "false"),
                StorageValue::Null => unreachable!("null handled above"),
            })),
            ColumnKind::Date => {
                let millis = match value {
                    StorageValue::Integer(i) => i,
                    StorageValue::Real(f) => f as i64,
                    StorageValue::Text(s) => DateTime::parse_from_rfc3339(&s)
                        .map(|d| d.timestamp_millis())
                        .map_err(|e| TroveError::type_error(column, format!("'{s}' is not a date: {e}")))?,
                    StorageValue::Null => unreachable!("null handled above"),
                };
                let stamp = date(column, millis)?;
                Ok(Value::String(stamp.to_rfc3339_opts(SecondsFormat::Millis, true)))
            }
            ColumnKind::Array | ColumnKind::Object | ColumnKind::Json => match value {
                StorageValue::Text(s) => serde_json::from_str(&s)
                    .map_err(|e| TroveError::type_error(column, format!("stored text is not JSON: {e}"))),
                StorageValue::Integer(i) => Ok(Value::from(i)),
                StorageValue::Real(f) => real_to_json(column, f),
                StorageValue::Null => Ok(Value::Null),
            },
        }
    }
}

impl FromStr for ColumnKind {
    type Err = TroveError;
    fn from_str(s: &str) -> Result<Self> {
        ColumnKind::ALL
            .iter()
            .find(|kind| kind.tag().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| TroveError::Schema(format!("'{s}' is not a column type")))
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

// milliseconds outside chrono's range could be stored but never read back
fn date(column: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| TroveError::type_error(column, format!("{millis} is out of range for a date")))
}

fn number_to_storage(column: &str, value: &Value) -> Result<StorageValue> {
    match value {
        Value::Number(n) => Ok(number(n)),
        Value::Bool(b) => Ok(StorageValue::Integer(*b as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(StorageValue::Integer(i))
            } else {
                s.parse::<f64>()
                    .map(StorageValue::Real)
                    .map_err(|_| TroveError::type_error(column, format!("'{s}' is not a number")))
            }
        }
        other => Err(TroveError::type_error(column, format!("{other} is not a number"))),
    }
}

fn number(n: &Number) -> StorageValue {
    match n.as_i64() {
        Some(i) => StorageValue::Integer(i),
        // u64 beyond i64 and floats both land here
        None => StorageValue::Real(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn real_to_json(column: &str, f: f64) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| TroveError::type_error(column, format!("{f} is not a finite number")))
}

// ------------- StorageValue -------------
#[derive(Debug, Clone, PartialEq)]
pub enum StorageValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl StorageValue {
    /// Structural conversion used for columns the schema does not know about.
    pub fn from_json(value: &Value) -> StorageValue {
        match value {
            Value::Null => StorageValue::Null,
            Value::Bool(b) => StorageValue::Integer(*b as i64),
            Value::Number(n) => number(n),
            Value::String(s) => StorageValue::Text(s.clone()),
            other => StorageValue::Text(other.to_string()),
        }
    }
    pub fn into_json(self) -> Value {
        match self {
            StorageValue::Null => Value::Null,
            StorageValue::Integer(i) => Value::from(i),
            StorageValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            StorageValue::Text(s) => Value::String(s),
        }
    }
    pub fn is_null(&self) -> bool {
        matches!(self, StorageValue::Null)
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StorageValue::Integer(i) => Some(*i),
            StorageValue::Real(f) => Some(*f as i64),
            StorageValue::Text(s) => s.trim().parse().ok(),
            StorageValue::Null => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StorageValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StorageValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageValue::Null => write!(f, "null"),
            StorageValue::Integer(i) => write!(f, "{}", i),
            StorageValue::Real(r) => write!(f, "{}", r),
            StorageValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl ToSql for StorageValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            StorageValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            StorageValue::Integer(i) => ToSqlOutput::from(*i),
            StorageValue::Real(f) => ToSqlOutput::from(*f),
            StorageValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for StorageValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(StorageValue::Null),
            ValueRef::Integer(i) => Ok(StorageValue::Integer(i)),
            ValueRef::Real(f) => Ok(StorageValue::Real(f)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| StorageValue::Text(s.to_owned()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            // blobs are never written by the cast engine
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

//! Criteria: the selection predicates accepted by model operations.
//!
//! Callers may describe a selection in three shapes, or a list of them:
//!
//! * `["name", "Dale"]` – a column and a value, meaning equality,
//! * `["age", ">", 20]` – a column, an operator and a value,
//! * `{"name": "Dale", "age": 30}` – a partial object of equalities.
//!
//! A list such as `[["age", ">", 20], {"name": "Dale"}]` and-combines its
//! members in the order they are given. The order is kept all the way into
//! the generated SQL.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Result, TroveError};
use crate::sql::Filter;
use crate::types::StorageValue;

// ------------- Operator -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    Glob,
    Is,
    IsNot,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::Glob => "glob",
            Operator::Is => "is",
            Operator::IsNot => "is not",
        }
    }
}

impl FromStr for Operator {
    type Err = TroveError;
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        Ok(match normalized.as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "glob" => Operator::Glob,
            "is" => Operator::Is,
            "is not" => Operator::IsNot,
            _ => {
                return Err(TroveError::InvalidCriteria(format!(
                    "'{s}' is not a supported operator"
                )));
            }
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

// ------------- Criteria -------------
/// A selection predicate. `V` is the value type: logical values
/// ([`serde_json::Value`]) as given by callers, and [`StorageValue`] once the
/// cast engine has serialized them. Only the latter can be turned into SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria<V = Value> {
    Tuple2(String, V),
    Tuple3(String, Operator, V),
    Object(Vec<(String, V)>),
    List(Vec<Criteria<V>>),
}

impl<V> Criteria<V> {
    /// Collapses two-element tuples into explicit equality tuples, recursively.
    pub fn normalize(self) -> Self {
        match self {
            Criteria::Tuple2(column, value) => Criteria::Tuple3(column, Operator::Eq, value),
            Criteria::List(members) => {
                Criteria::List(members.into_iter().map(Criteria::normalize).collect())
            }
            other => other,
        }
    }

    /// Rebuilds the criteria with every value passed through `f`, which also
    /// receives the column the value belongs to.
    pub fn try_map<W, F>(self, f: &mut F) -> Result<Criteria<W>>
    where
        F: FnMut(&str, V) -> Result<W>,
    {
        Ok(match self {
            Criteria::Tuple2(column, value) => {
                let value = f(&column, value)?;
                Criteria::Tuple2(column, value)
            }
            Criteria::Tuple3(column, operator, value) => {
                let value = f(&column, value)?;
                Criteria::Tuple3(column, operator, value)
            }
            Criteria::Object(pairs) => Criteria::Object(
                pairs
                    .into_iter()
                    .map(|(column, value)| f(&column, value).map(|value| (column, value)))
                    .collect::<Result<_>>()?,
            ),
            Criteria::List(members) => Criteria::List(
                members
                    .into_iter()
                    .map(|member| member.try_map(&mut *f))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// True for an empty object or an empty list, which select everything.
    pub fn is_empty(&self) -> bool {
        match self {
            Criteria::Object(pairs) => pairs.is_empty(),
            Criteria::List(members) => members.iter().all(Criteria::is_empty),
            _ => false,
        }
    }
}

impl Criteria<Value> {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Criteria::Tuple2(column.into(), value.into())
    }
    pub fn compare(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Criteria::Tuple3(column.into(), operator, value.into())
    }
    pub fn all(members: impl IntoIterator<Item = Criteria>) -> Self {
        Criteria::List(members.into_iter().collect())
    }

    /// Reads criteria from their JSON form.
    pub fn from_json(value: &Value) -> Result<Self> {
        if is_tuple(value) {
            let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
            let column = items[0].as_str().unwrap_or_default().to_owned();
            return match items {
                [_, value] => Ok(Criteria::Tuple2(column, value.clone())),
                [_, operator, value] => {
                    let operator = operator.as_str().ok_or_else(|| {
                        TroveError::InvalidCriteria(format!("{operator} is not an operator"))
                    })?;
                    Ok(Criteria::Tuple3(column, operator.parse()?, value.clone()))
                }
                _ => unreachable!("is_tuple guarantees two or three elements"),
            };
        }
        if let Value::Object(object) = value {
            return Ok(Criteria::Object(
                object.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ));
        }
        if is_multiple(value) {
            let members = value.as_array().map(Vec::as_slice).unwrap_or_default();
            return Ok(Criteria::List(
                members.iter().map(Criteria::from_json).collect::<Result<_>>()?,
            ));
        }
        Err(TroveError::InvalidCriteria(format!(
            "{value} is neither a tuple, an object nor a list of those"
        )))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Criteria::Tuple2(c, v) => Value::Array(vec![Value::from(c.as_str()), v.clone()]),
            Criteria::Tuple3(c, o, v) => Value::Array(vec![
                Value::from(c.as_str()),
                Value::from(o.as_sql()),
                v.clone(),
            ]),
            Criteria::Object(pairs) => Value::Object(
                pairs.iter().map(|(c, v)| (c.clone(), v.clone())).collect(),
            ),
            Criteria::List(members) => Value::Array(members.iter().map(Criteria::to_json).collect()),
        }
    }
}

impl TryFrom<Value> for Criteria<Value> {
    type Error = TroveError;
    fn try_from(value: Value) -> Result<Self> {
        Criteria::from_json(&value)
    }
}

impl From<serde_json::Map<String, Value>> for Criteria<Value> {
    fn from(object: serde_json::Map<String, Value>) -> Self {
        Criteria::Object(object.into_iter().collect())
    }
}

// ------------- Shape checks -------------
pub fn is_tuple(value: &Value) -> bool {
    match value {
        Value::Array(items) => (items.len() == 2 || items.len() == 3) && items[0].is_string(),
        _ => false,
    }
}

pub fn is_multiple(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(|item| is_tuple(item) || item.is_object()),
        _ => false,
    }
}

pub fn is_valid(value: &Value) -> bool {
    is_tuple(value) || value.is_object() || is_multiple(value)
}

/// Parses and normalizes criteria given in JSON form.
pub fn normalize(value: &Value) -> Result<Criteria> {
    Criteria::from_json(value).map(Criteria::normalize)
}

/// Applies serialized criteria onto a where clause, keeping encounter order.
pub fn build_predicate(filter: &mut Filter, criteria: &Criteria<StorageValue>) {
    match criteria {
        Criteria::Tuple2(column, value) => {
            filter.compare(column, Operator::Eq, value.clone());
        }
        Criteria::Tuple3(column, operator, value) => {
            filter.compare(column, *operator, value.clone());
        }
        Criteria::Object(pairs) => {
            for (column, value) in pairs {
                filter.compare(column, Operator::Eq, value.clone());
            }
        }
        Criteria::List(members) => {
            for member in members {
                build_predicate(filter, member);
            }
        }
    }
}

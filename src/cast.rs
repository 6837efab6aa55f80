//! The cast engine: a model's serializer and deserializer.
//!
//! Built once per model from its schema. Serializing applies the column's
//! `set` transform followed by the type registry conversion; deserializing
//! applies the conversion back followed by the `get` transform. Columns the
//! schema does not know about are converted structurally and passed on, so
//! that SQLite can reject them.

use std::sync::Arc;

use serde_json::Value;

use crate::criteria::Criteria;
use crate::error::{Result, TroveError};
use crate::schema::{Column, Schema};
use crate::types::{ColumnKind, StorageValue};

pub type Record = serde_json::Map<String, Value>;
/// A row as it comes from or goes to SQLite, columns in order.
pub type Row = Vec<(String, StorageValue)>;

#[derive(Debug, Clone, Copy, Default)]
pub struct CastOptions {
    /// Skip the get/set transforms, the type conversion still applies.
    pub raw: bool,
    /// The record is about to be inserted: absent columns take their
    /// defaults and absent non-nullable columns are refused.
    pub insert: bool,
}

impl CastOptions {
    pub fn raw() -> Self {
        Self {
            raw: true,
            ..Default::default()
        }
    }
    pub fn insert() -> Self {
        Self {
            insert: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cast {
    model: String,
    schema: Arc<Schema>,
}

impl Cast {
    pub fn new(model: &str, schema: Arc<Schema>) -> Self {
        Self {
            model: model.to_owned(),
            schema,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn serialize(&self, record: &Record, options: CastOptions) -> Result<Row> {
        let mut row = Row::with_capacity(record.len());
        for (name, column) in self.schema.columns() {
            let value = match record.get(name) {
                Some(value) => value.clone(),
                None if options.insert => match column.default_value() {
                    Some(default) => default.clone(),
                    None if column.kind() == ColumnKind::Increments => continue,
                    None if !column.is_nullable() => return Err(self.nullability(name)),
                    None => continue,
                },
                None => continue,
            };
            let value = self.apply_setter(column, value, options);
            if value.is_null() && !column.is_nullable() {
                return Err(self.nullability(name));
            }
            row.push((name.clone(), column.kind().to_storage(name, &value)?));
        }
        for (name, value) in record {
            if !self.schema.contains(name) {
                row.push((name.clone(), StorageValue::from_json(value)));
            }
        }
        Ok(row)
    }

    /// Serializes only the value positions of criteria, with no nullability
    /// check: comparing against null is a legitimate selection.
    pub fn serialize_criteria(
        &self,
        criteria: Criteria<Value>,
        options: CastOptions,
    ) -> Result<Criteria<StorageValue>> {
        criteria.try_map(&mut |name: &str, value: Value| match self.schema.column(name) {
            Some(column) => {
                let value = self.apply_setter(column, value, options);
                column.kind().to_storage(name, &value)
            }
            None => Ok(StorageValue::from_json(&value)),
        })
    }

    /// Serializes one value for a known column, e.g. an increment amount.
    pub fn serialize_column(&self, name: &str, value: Value, options: CastOptions) -> Result<StorageValue> {
        match self.schema.column(name) {
            Some(column) => {
                let value = self.apply_setter(column, value, options);
                if value.is_null() && !column.is_nullable() {
                    return Err(self.nullability(name));
                }
                column.kind().to_storage(name, &value)
            }
            None => Ok(StorageValue::from_json(&value)),
        }
    }

    pub fn deserialize(&self, row: Row, options: CastOptions) -> Result<Record> {
        let mut record = Record::new();
        for (name, value) in row {
            let value = match self.schema.column(&name) {
                Some(column) => {
                    let value = column.kind().from_storage(&name, value)?;
                    self.apply_getter(column, value, options)
                }
                None => value.into_json(),
            };
            record.insert(name, value);
        }
        Ok(record)
    }

    /// The single column variant used by projections and aggregates.
    pub fn deserialize_column(&self, name: &str, value: StorageValue, options: CastOptions) -> Result<Value> {
        let column = self
            .schema
            .column(name)
            .ok_or_else(|| TroveError::type_error(name, format!("not a column of '{}'", self.model)))?;
        let value = column.kind().from_storage(name, value)?;
        Ok(self.apply_getter(column, value, options))
    }

    fn apply_setter(&self, column: &Column, value: Value, options: CastOptions) -> Value {
        match column.setter() {
            Some(set) if !options.raw => set(value),
            _ => value,
        }
    }

    fn apply_getter(&self, column: &Column, value: Value, options: CastOptions) -> Value {
        match column.getter() {
            Some(get) if !options.raw => get(value),
            _ => value,
        }
    }

    fn nullability(&self, column: &str) -> TroveError {
        TroveError::Nullability {
            model: self.model.clone(),
            column: column.to_owned(),
        }
    }
}

//! Schemas: ordered column descriptors for a model.
//!
//! A [`Column`] is built either through its builder methods or parsed from a
//! JSON description, where the type tag is resolved into a [`ColumnKind`]
//! once, when the schema is normalized.

use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, TroveError};
use crate::types::ColumnKind;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

pub(crate) fn check_identifier(what: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(TroveError::Schema(format!("'{name}' is not a valid {what} name")))
    }
}

/// A get or set transform applied to a column's logical value.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

// ------------- Column -------------
#[derive(Clone, Default)]
pub struct Column {
    kind: ColumnKind,
    default_to: Option<Value>,
    nullable: Option<bool>,
    not_nullable: Option<bool>,
    primary: bool,
    unique: bool,
    index: Option<String>,
    get: Option<Transform>,
    set: Option<Transform>,
}

impl Column {
    pub fn new(kind: ColumnKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
    pub fn string() -> Self { Self::new(ColumnKind::String) }
    pub fn number() -> Self { Self::new(ColumnKind::Number) }
    pub fn boolean() -> Self { Self::new(ColumnKind::Boolean) }
    pub fn date() -> Self { Self::new(ColumnKind::Date) }
    pub fn array() -> Self { Self::new(ColumnKind::Array) }
    pub fn object() -> Self { Self::new(ColumnKind::Object) }
    pub fn json() -> Self { Self::new(ColumnKind::Json) }
    pub fn increments() -> Self { Self::new(ColumnKind::Increments) }

    pub fn default_to(mut self, value: impl Into<Value>) -> Self {
        self.default_to = Some(value.into());
        self
    }
    pub fn nullable(mut self) -> Self {
        self.nullable = Some(true);
        self
    }
    pub fn not_nullable(mut self) -> Self {
        self.not_nullable = Some(true);
        self
    }
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }
    pub fn get<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(transform));
        self
    }
    pub fn set<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(transform));
        self
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }
    pub fn default_value(&self) -> Option<&Value> {
        self.default_to.as_ref()
    }
    /// A column refuses nulls only when it says so, through `not_nullable`
    /// or an explicit `nullable: false`.
    pub fn is_nullable(&self) -> bool {
        !(self.not_nullable == Some(true) || self.nullable == Some(false))
    }
    pub fn is_primary(&self) -> bool {
        self.primary || self.kind == ColumnKind::Increments
    }
    pub fn is_unique(&self) -> bool {
        self.unique
    }
    pub fn index_name(&self) -> Option<&str> {
        self.index.as_deref()
    }
    pub fn getter(&self) -> Option<&Transform> {
        self.get.as_ref()
    }
    pub fn setter(&self) -> Option<&Transform> {
        self.set.as_ref()
    }

    fn validate(&self, name: &str) -> Result<()> {
        check_identifier("column", name)?;
        if self.nullable.is_some() && self.not_nullable.is_some() {
            return Err(TroveError::Schema(format!(
                "column '{name}' sets both nullable and notNullable"
            )));
        }
        if let Some(index) = &self.index {
            check_identifier("index", index)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Column")
            .field("kind", &self.kind)
            .field("default_to", &self.default_to)
            .field("nullable", &self.nullable)
            .field("not_nullable", &self.not_nullable)
            .field("primary", &self.primary)
            .field("unique", &self.unique)
            .field("index", &self.index)
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .finish()
    }
}

/// The JSON shape of a column description.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ColumnSpec {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub default_to: Option<Value>,
    pub nullable: Option<bool>,
    pub not_nullable: Option<bool>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    pub index: Option<String>,
}

impl TryFrom<ColumnSpec> for Column {
    type Error = TroveError;
    fn try_from(spec: ColumnSpec) -> Result<Self> {
        // an unspecified type degrades to string
        let kind = match spec.kind {
            Some(tag) => tag.parse()?,
            None => ColumnKind::String,
        };
        Ok(Column {
            kind,
            default_to: spec.default_to,
            nullable: spec.nullable,
            not_nullable: spec.not_nullable,
            primary: spec.primary,
            unique: spec.unique,
            index: spec.index,
            get: None,
            set: None,
        })
    }
}

// ------------- Schema -------------
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<(String, Column)>,
}

impl Schema {
    pub fn new<N: Into<String>>(columns: impl IntoIterator<Item = (N, Column)>) -> Result<Self> {
        let columns: Vec<(String, Column)> = columns
            .into_iter()
            .map(|(name, column)| (name.into(), column))
            .collect();
        if columns.is_empty() {
            return Err(TroveError::Schema("a schema needs at least one column".into()));
        }
        for (i, (name, column)) in columns.iter().enumerate() {
            column.validate(name)?;
            if columns[..i].iter().any(|(other, _)| other == name) {
                return Err(TroveError::Schema(format!("column '{name}' is declared twice")));
            }
        }
        let increments = columns
            .iter()
            .filter(|(_, c)| c.kind == ColumnKind::Increments)
            .count();
        if increments > 1 {
            return Err(TroveError::Schema(
                "at most one column may be an auto-increment key".into(),
            ));
        }
        if increments == 1 && columns.iter().any(|(_, c)| c.primary && c.kind != ColumnKind::Increments) {
            return Err(TroveError::Schema(
                "an auto-increment key cannot share the primary key with other columns".into(),
            ));
        }
        Ok(Self { columns })
    }

    /// Parses a schema from JSON, e.g. `{"name": "string", "age": {"type": "number"}}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| TroveError::Schema("a schema must be a JSON object".into()))?;
        let mut columns = Vec::with_capacity(object.len());
        for (name, description) in object {
            let spec = match description {
                Value::String(tag) => ColumnSpec {
                    kind: Some(tag.clone()),
                    ..Default::default()
                },
                Value::Object(_) => ColumnSpec::deserialize(description)
                    .map_err(|e| TroveError::Schema(format!("column '{name}': {e}")))?,
                other => {
                    return Err(TroveError::Schema(format!(
                        "column '{name}' has an unusable description: {other}"
                    )));
                }
            };
            columns.push((name.clone(), Column::try_from(spec)?));
        }
        Schema::new(columns)
    }

    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }
    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
    pub fn len(&self) -> usize {
        self.columns.len()
    }
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
    pub(crate) fn push(&mut self, name: &str, column: Column) {
        if !self.contains(name) {
            self.columns.push((name.to_owned(), column));
        }
    }
}

// ------------- ModelOptions -------------
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Adds `created_at` and `updated_at` date columns kept by the model.
    pub timestamps: bool,
    /// Composite primary key.
    pub primary: Vec<String>,
    /// Composite unique constraint.
    pub unique: Vec<String>,
}

impl ModelOptions {
    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }
    pub fn primary<N: Into<String>>(mut self, columns: impl IntoIterator<Item = N>) -> Self {
        self.primary = columns.into_iter().map(Into::into).collect();
        self
    }
    pub fn unique<N: Into<String>>(mut self, columns: impl IntoIterator<Item = N>) -> Self {
        self.unique = columns.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn validate(&self, schema: &Schema) -> Result<()> {
        for name in self.primary.iter().chain(self.unique.iter()) {
            if !schema.contains(name) {
                return Err(TroveError::Schema(format!(
                    "key column '{name}' is not part of the schema"
                )));
            }
        }
        if !self.primary.is_empty()
            && schema.columns().iter().any(|(_, c)| c.kind() == ColumnKind::Increments)
        {
            return Err(TroveError::Schema(
                "a composite primary key cannot be combined with an auto-increment key".into(),
            ));
        }
        Ok(())
    }
}

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

//! Statement building.
//!
//! Every builder renders into a [`Statement`]: SQL text with positional `?`
//! placeholders and the [`StorageValue`]s bound to them. Identifiers are
//! always double quoted, so a column name the schema does not know about
//! still produces valid SQL and fails inside SQLite instead of here.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::criteria::Operator;
use crate::schema::{ModelOptions, Schema};
use crate::types::StorageValue;

lazy_static! {
    static ref INTROSPECTION: Regex = Regex::new(
        r"(?is)^\s*(pragma\s+(main\.|temp\.)?table_info|select\s.+\sfrom\s+(main\.)?sqlite_(master|schema)\b)"
    )
    .unwrap();
    static ref READ_ONLY: Regex = Regex::new(r"(?i)^\s*(select|pragma|explain|with)\b").unwrap();
}

pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// True when the text asks about the shape of the database rather than its data.
pub fn is_introspection(sql: &str) -> bool {
    INTROSPECTION.is_match(sql)
}

pub fn is_read_only(sql: &str) -> bool {
    READ_ONLY.is_match(sql)
}

// ------------- Statement -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<StorageValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
    pub fn with_params(sql: impl Into<String>, params: Vec<StorageValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}
impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, " -- [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

// ------------- Filter -------------
/// The where clause under construction. Clauses are and-combined in the
/// order they were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<String>,
    params: Vec<StorageValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn compare(&mut self, column: &str, operator: Operator, value: StorageValue) -> &mut Self {
        let column = quote(column);
        match (operator, value) {
            (Operator::Eq | Operator::Is, StorageValue::Null) => {
                self.clauses.push(format!("{column} is null"));
            }
            (Operator::Ne | Operator::IsNot, StorageValue::Null) => {
                self.clauses.push(format!("{column} is not null"));
            }
            (operator, value) => {
                self.clauses.push(format!("{column} {} ?", operator.as_sql()));
                self.params.push(value);
            }
        }
        self
    }
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }
    fn render(&self, sql: &mut String, params: &mut Vec<StorageValue>) {
        if !self.clauses.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&self.clauses.join(" and "));
            params.extend(self.params.iter().cloned());
        }
    }
}

// ------------- Select -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    Count { distinct: Option<String> },
    Min(String),
    Max(String),
}

#[derive(Debug, Clone)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    aggregate: Option<Aggregate>,
    filter: Filter,
    order: Vec<(String, Direction)>,
    random: bool,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            columns: Vec::new(),
            aggregate: None,
            filter: Filter::new(),
            order: Vec::new(),
            random: false,
            limit: None,
            offset: None,
        }
    }
    pub fn columns<N: AsRef<str>>(mut self, columns: &[N]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_owned()).collect();
        self
    }
    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order.push((column.to_owned(), direction));
        self
    }
    pub fn random(mut self) -> Self {
        self.random = true;
        self
    }
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
    pub fn build(&self) -> Statement {
        let projection = match &self.aggregate {
            Some(Aggregate::Count { distinct: None }) => "count(*) as \"count\"".to_owned(),
            Some(Aggregate::Count { distinct: Some(c) }) => {
                format!("count(distinct {}) as \"count\"", quote(c))
            }
            Some(Aggregate::Min(c)) => format!("min({}) as {}", quote(c), quote(c)),
            Some(Aggregate::Max(c)) => format!("max({}) as {}", quote(c), quote(c)),
            None if self.columns.is_empty() => "*".to_owned(),
            None => self.columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
        };
        let mut sql = format!("select {} from {}", projection, quote(&self.table));
        let mut params = Vec::new();
        self.filter.render(&mut sql, &mut params);
        if self.random {
            sql.push_str(" order by random()");
        } else if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|(c, d)| match d {
                    Direction::Asc => format!("{} asc", quote(c)),
                    Direction::Desc => format!("{} desc", quote(c)),
                })
                .collect();
            sql.push_str(" order by ");
            sql.push_str(&order.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" limit {limit} offset {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" limit {limit}")),
            // sqlite only accepts an offset after a limit
            (None, Some(offset)) => sql.push_str(&format!(" limit -1 offset {offset}")),
            (None, None) => (),
        }
        Statement::with_params(sql, params)
    }
}

// ------------- Insert -------------
#[derive(Debug, Clone)]
pub struct Insert {
    table: String,
    values: Vec<(String, StorageValue)>,
}

impl Insert {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            values: Vec::new(),
        }
    }
    pub fn values(mut self, values: Vec<(String, StorageValue)>) -> Self {
        self.values = values;
        self
    }
    pub fn build(&self) -> Statement {
        if self.values.is_empty() {
            return Statement::new(format!("insert into {} default values", quote(&self.table)));
        }
        let columns: Vec<String> = self.values.iter().map(|(c, _)| quote(c)).collect();
        let placeholders = vec!["?"; self.values.len()].join(", ");
        Statement::with_params(
            format!(
                "insert into {} ({}) values ({})",
                quote(&self.table),
                columns.join(", "),
                placeholders
            ),
            self.values.iter().map(|(_, v)| v.clone()).collect(),
        )
    }
}

// ------------- Update -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Value(StorageValue),
    Increment(StorageValue),
    /// Subtracts, clamping at zero unless negative results are allowed.
    Decrement { amount: StorageValue, allow_negative: bool },
}

#[derive(Debug, Clone)]
pub struct Update {
    table: String,
    assignments: Vec<(String, Assignment)>,
    filter: Filter,
}

impl Update {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            assignments: Vec::new(),
            filter: Filter::new(),
        }
    }
    pub fn set(mut self, column: &str, assignment: Assignment) -> Self {
        self.assignments.push((column.to_owned(), assignment));
        self
    }
    pub fn values(mut self, values: Vec<(String, StorageValue)>) -> Self {
        self.assignments
            .extend(values.into_iter().map(|(c, v)| (c, Assignment::Value(v))));
        self
    }
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
    pub fn build(&self) -> Statement {
        let mut params = Vec::new();
        let assignments: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, assignment)| {
                let c = quote(column);
                match assignment {
                    Assignment::Value(v) => {
                        params.push(v.clone());
                        format!("{c} = ?")
                    }
                    Assignment::Increment(v) => {
                        params.push(v.clone());
                        format!("{c} = {c} + ?")
                    }
                    Assignment::Decrement { amount, allow_negative: true } => {
                        params.push(amount.clone());
                        format!("{c} = {c} - ?")
                    }
                    Assignment::Decrement { amount, allow_negative: false } => {
                        params.push(amount.clone());
                        format!("{c} = max({c} - ?, 0)")
                    }
                }
            })
            .collect();
        let mut sql = format!("update {} set {}", quote(&self.table), assignments.join(", "));
        self.filter.render(&mut sql, &mut params);
        Statement::with_params(sql, params)
    }
}

// ------------- Delete -------------
#[derive(Debug, Clone)]
pub struct Delete {
    table: String,
    filter: Filter,
}

impl Delete {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            filter: Filter::new(),
        }
    }
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
    pub fn build(&self) -> Statement {
        let mut sql = format!("delete from {}", quote(&self.table));
        let mut params = Vec::new();
        self.filter.render(&mut sql, &mut params);
        Statement::with_params(sql, params)
    }
}

/// SQLite has no truncate; an unfiltered delete is optimised into one.
pub fn truncate(table: &str) -> Statement {
    Delete::table(table).build()
}

// ------------- DDL -------------
pub fn create_table(table: &str, schema: &Schema, options: &ModelOptions) -> Statement {
    let mut definitions = Vec::new();
    for (name, column) in schema.columns() {
        let mut definition = format!("{} {}", quote(name), column.kind().sql_type());
        if !column.is_nullable() {
            definition.push_str(" not null");
        }
        if column.is_unique() {
            definition.push_str(" unique");
        }
        definitions.push(definition);
    }
    let primary: Vec<&String> = if !options.primary.is_empty() {
        options.primary.iter().collect()
    } else {
        schema
            .columns()
            .iter()
            .filter(|(_, c)| c.is_primary() && c.kind() != crate::types::ColumnKind::Increments)
            .map(|(n, _)| n)
            .collect()
    };
    if !primary.is_empty() {
        let keys: Vec<String> = primary.iter().map(|c| quote(c)).collect();
        definitions.push(format!("primary key ({})", keys.join(", ")));
    }
    if !options.unique.is_empty() {
        let keys: Vec<String> = options.unique.iter().map(|c| quote(c)).collect();
        definitions.push(format!("unique ({})", keys.join(", ")));
    }
    Statement::new(format!(
        "create table if not exists {} ({})",
        quote(table),
        definitions.join(", ")
    ))
}

pub fn create_index(table: &str, index: &str, columns: &[&str]) -> Statement {
    let columns: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    Statement::new(format!(
        "create index if not exists {} on {} ({})",
        quote(index),
        quote(table),
        columns.join(", ")
    ))
}

pub fn drop_table(table: &str) -> Statement {
    Statement::new(format!("drop table if exists {}", quote(table)))
}

pub fn has_table(table: &str) -> Statement {
    Statement::with_params(
        "select name from sqlite_master where type = 'table' and name = ?",
        vec![StorageValue::Text(table.to_owned())],
    )
}

pub fn list_tables() -> Statement {
    Statement::new(
        "select name from sqlite_master where type = 'table' and name not like 'sqlite_%' order by name",
    )
}

/// An empty temp table with the columns of `table`.
pub fn create_scratch(scratch: &str, table: &str) -> Statement {
    Statement::new(format!(
        "create temp table {} as select * from {} where 0",
        quote(scratch),
        quote(table)
    ))
}

pub fn drop_scratch(scratch: &str) -> Statement {
    Statement::new(format!("drop table if exists temp.{}", quote(scratch)))
}

/// A temp trigger copying every affected row of `table` into `scratch`.
/// `row` is `new` for inserts and updates, `old` for deletes.
pub fn create_capture_trigger(
    trigger: &str,
    event: &str,
    table: &str,
    scratch: &str,
    row: &str,
    columns: &[String],
) -> Statement {
    let targets: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let sources: Vec<String> = columns.iter().map(|c| format!("{row}.{}", quote(c))).collect();
    Statement::new(format!(
        "create temp trigger {} after {} on {} begin insert into {} ({}) values ({}); end",
        quote(trigger),
        event,
        quote(table),
        quote(scratch),
        targets.join(", "),
        sources.join(", ")
    ))
}

pub fn drop_trigger(trigger: &str) -> Statement {
    Statement::new(format!("drop trigger if exists temp.{}", quote(trigger)))
}

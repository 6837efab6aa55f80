//! Models: a named table, its schema and the operations on it.
//!
//! Every mutating operation runs with change capture armed, so what it
//! returns are the rows as SQLite stored them, deserialized back through the
//! model's cast. Hooks run around create, update and remove; a `before_*`
//! subscriber that cancels turns the operation into a no-op that returns an
//! empty result.

use std::future::Future;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::capture::{capture, CaptureEvent, Captured};
use crate::cast::{Cast, CastOptions, Record, Row};
use crate::criteria::{build_predicate, Criteria};
use crate::error::Result;
use crate::hooks::{HookId, HookResult, ModelHooks, QueryEvent, UpdateArgs};
use crate::router::{Router, Session, UnitKind};
use crate::schema::{check_identifier, Column, ModelOptions, Schema, CREATED_AT, UPDATED_AT};
use crate::sql::{self, Aggregate, Assignment, Delete, Direction, Filter, Insert, Select, Statement, Update};
use crate::types::StorageValue;

/// Shape of a `find`: ordering, paging and whether get transforms apply.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub order: Vec<(String, Direction)>,
    pub random: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub raw: bool,
}

impl FindOptions {
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
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    fn apply(&self, mut select: Select) -> Select {
        for (column, direction) in &self.order {
            select = select.order_by(column, *direction);
        }
        if self.random {
            select = select.random();
        }
        if let Some(limit) = self.limit {
            select = select.limit(limit);
        }
        if let Some(offset) = self.offset {
            select = select.offset(offset);
        }
        select
    }

    fn cast(&self) -> CastOptions {
        CastOptions {
            raw: self.raw,
            ..Default::default()
        }
    }
}

pub struct Model {
    name: String,
    schema: Arc<Schema>,
    options: ModelOptions,
    cast: Cast,
    router: Arc<Router>,
    hooks: ModelHooks,
}

impl Model {
    /// Validates the definition and creates the table and its indexes when
    /// they do not exist yet.
    pub(crate) async fn define(
        router: Arc<Router>,
        name: &str,
        mut schema: Schema,
        options: ModelOptions,
    ) -> Result<Model> {
        check_identifier("model", name)?;
        if options.timestamps {
            schema.push(CREATED_AT, Column::date());
            schema.push(UPDATED_AT, Column::date());
        }
        options.validate(&schema)?;

        let mut statements = vec![sql::create_table(name, &schema, &options)];
        // columns sharing an index name end up in one index, in schema order
        let mut indexes: Vec<(&str, Vec<&str>)> = Vec::new();
        for (column, descriptor) in schema.columns() {
            if let Some(index) = descriptor.index_name() {
                match indexes.iter_mut().find(|(name, _)| *name == index) {
                    Some((_, columns)) => columns.push(column.as_str()),
                    None => indexes.push((index, vec![column.as_str()])),
                }
            }
        }
        statements.extend(
            indexes
                .iter()
                .map(|(index, columns)| sql::create_index(name, index, columns)),
        );
        router
            .unit(UnitKind::Write, Some(name), move |session| {
                for statement in &statements {
                    session.run(statement, false)?;
                }
                Ok(())
            })
            .await?;
        info!(model = name, columns = schema.len(), "model defined");

        let schema = Arc::new(schema);
        Ok(Model {
            name: name.to_owned(),
            cast: Cast::new(name, Arc::clone(&schema)),
            schema,
            options,
            router,
            hooks: ModelHooks::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn cast(&self) -> &Cast {
        &self.cast
    }

    // ------------- Create -------------
    /// Inserts one record and returns it as stored, or `None` when a
    /// `before_create` subscriber cancelled.
    pub async fn create(&self, data: Record) -> Result<Option<Record>> {
        let mut data = data;
        if self.options.timestamps {
            let now = now();
            data.entry(CREATED_AT).or_insert_with(|| now.clone());
            data.entry(UPDATED_AT).or_insert(now);
        }
        if self.hooks.before_create.run(data.clone()).await == HookResult::Cancel {
            debug!(model = %self.name, "create cancelled");
            return Ok(None);
        }
        let row = self.cast.serialize(&data, CastOptions::insert())?;
        let statement = Insert::table(&self.name).values(row).build();
        let captured = self.mutate(CaptureEvent::Insert, statement).await?;
        let created = match captured.rows.into_iter().next() {
            Some(row) => Some(self.cast.deserialize(row, CastOptions::default())?),
            None => None,
        };
        if let Some(record) = &created {
            self.hooks.after_create.notify(record.clone()).await;
        }
        Ok(created)
    }

    // ------------- Read -------------
    /// All rows matching `criteria`, every row when it is `None`.
    pub async fn find(&self, criteria: Option<Criteria>, options: FindOptions) -> Result<Vec<Record>> {
        let select = options.apply(Select::table(&self.name).filter(self.filter(criteria)?));
        let rows = self.read(select.build()).await?;
        rows.into_iter()
            .map(|row| self.cast.deserialize(row, options.cast()))
            .collect()
    }

    /// The first matching row. Without criteria nothing is selected and no
    /// statement is issued.
    pub async fn find_one(&self, criteria: Option<Criteria>) -> Result<Option<Record>> {
        if criteria.is_none() {
            return Ok(None);
        }
        let found = self.find(criteria, FindOptions::default().limit(1)).await?;
        Ok(found.into_iter().next())
    }

    /// One column of every matching row.
    pub async fn find_column(
        &self,
        column: &str,
        criteria: Option<Criteria>,
        options: FindOptions,
    ) -> Result<Vec<Value>> {
        let select = options.apply(
            Select::table(&self.name)
                .columns(&[column])
                .filter(self.filter(criteria)?),
        );
        let rows = self.read(select.build()).await?;
        rows.into_iter()
            .map(|row| self.single(column, row, options.cast()))
            .collect()
    }

    /// The value of `column` on the first matching row.
    pub async fn get(&self, column: &str, criteria: Criteria) -> Result<Option<Value>> {
        let values = self
            .find_column(column, Some(criteria), FindOptions::default().limit(1))
            .await?;
        Ok(values.into_iter().next())
    }

    // ------------- Update -------------
    /// Sets one column on every matching row.
    pub async fn set(&self, column: &str, criteria: Criteria, value: impl Into<Value>) -> Result<Vec<Record>> {
        let mut data = Record::new();
        data.insert(column.to_owned(), value.into());
        self.update(criteria, data).await
    }

    /// Applies `data` to every matching row and returns the rows as they are
    /// afterwards. Empty `data` changes nothing.
    pub async fn update(&self, criteria: Criteria, data: Record) -> Result<Vec<Record>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut data = data;
        if self.options.timestamps {
            data.entry(UPDATED_AT).or_insert_with(now);
        }
        let arguments = UpdateArgs {
            criteria: criteria.clone(),
            data: data.clone(),
        };
        if self.hooks.before_update.run(arguments).await == HookResult::Cancel {
            debug!(model = %self.name, "update cancelled");
            return Ok(Vec::new());
        }
        let row = self.cast.serialize(&data, CastOptions::default())?;
        let statement = Update::table(&self.name)
            .values(row)
            .filter(self.filter(Some(criteria))?)
            .build();
        let updated = self.records(self.mutate(CaptureEvent::Update, statement).await?)?;
        for record in &updated {
            self.hooks.after_update.notify(record.clone()).await;
        }
        Ok(updated)
    }

    /// Returns the existing match, or creates one from the object form of
    /// `criteria` overlaid with `data`.
    pub async fn find_or_create(&self, criteria: Criteria, data: Record) -> Result<Option<Record>> {
        if let Some(found) = self.find_one(Some(criteria.clone())).await? {
            return Ok(Some(found));
        }
        self.create(merge(&criteria, data)).await
    }

    pub async fn update_or_create(&self, criteria: Criteria, data: Record) -> Result<Vec<Record>> {
        if self.find_one(Some(criteria.clone())).await?.is_some() {
            return self.update(criteria, data).await;
        }
        Ok(self.create(merge(&criteria, data)).await?.into_iter().collect())
    }

    pub async fn increment(&self, column: &str, criteria: Criteria, amount: impl Into<Value>) -> Result<Vec<Record>> {
        let amount = self.cast.serialize_column(column, amount.into(), CastOptions::raw())?;
        self.adjust(column, criteria, Assignment::Increment(amount)).await
    }

    /// Subtracts `amount`. Unless `allow_negative` is set the result is
    /// floored at zero.
    pub async fn decrement(
        &self,
        column: &str,
        criteria: Criteria,
        amount: impl Into<Value>,
        allow_negative: bool,
    ) -> Result<Vec<Record>> {
        let amount = self.cast.serialize_column(column, amount.into(), CastOptions::raw())?;
        self.adjust(
            column,
            criteria,
            Assignment::Decrement {
                amount,
                allow_negative,
            },
        )
        .await
    }

    async fn adjust(&self, column: &str, criteria: Criteria, assignment: Assignment) -> Result<Vec<Record>> {
        let mut update = Update::table(&self.name).set(column, assignment);
        if self.options.timestamps {
            let stamp = self.cast.serialize_column(UPDATED_AT, now(), CastOptions::default())?;
            update = update.set(UPDATED_AT, Assignment::Value(stamp));
        }
        let statement = update.filter(self.filter(Some(criteria))?).build();
        self.records(self.mutate(CaptureEvent::Update, statement).await?)
    }

    // ------------- Remove -------------
    /// Deletes matching rows and returns them. Empty criteria remove nothing;
    /// use [`Model::clear`] to empty the table.
    pub async fn remove(&self, criteria: Criteria) -> Result<Vec<Record>> {
        if criteria.is_empty() {
            return Ok(Vec::new());
        }
        if self.hooks.before_remove.run(criteria.clone()).await == HookResult::Cancel {
            debug!(model = %self.name, "remove cancelled");
            return Ok(Vec::new());
        }
        let statement = Delete::table(&self.name)
            .filter(self.filter(Some(criteria))?)
            .build();
        let removed = self.records(self.mutate(CaptureEvent::Delete, statement).await?)?;
        for record in &removed {
            self.hooks.after_remove.notify(record.clone()).await;
        }
        Ok(removed)
    }

    /// Deletes every row, answering how many there were.
    pub async fn clear(&self) -> Result<usize> {
        let statement = sql::truncate(&self.name);
        self.router
            .unit(UnitKind::Write, Some(&self.name), move |session| session.run(&statement, false))
            .await
    }

    // ------------- Aggregates -------------
    pub async fn count(&self, criteria: Option<Criteria>) -> Result<u64> {
        self.count_rows(criteria, None).await
    }

    /// Number of distinct non-null values of `column` among matching rows.
    pub async fn count_distinct(&self, column: &str, criteria: Option<Criteria>) -> Result<u64> {
        self.count_rows(criteria, Some(column.to_owned())).await
    }

    async fn count_rows(&self, criteria: Option<Criteria>, distinct: Option<String>) -> Result<u64> {
        let statement = Select::table(&self.name)
            .aggregate(Aggregate::Count { distinct })
            .filter(self.filter(criteria)?)
            .build();
        let rows = self.read(statement).await?;
        let count = rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .and_then(|(_, value)| value.as_i64())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    pub async fn min(&self, column: &str, criteria: Option<Criteria>) -> Result<Option<Value>> {
        self.extreme(Aggregate::Min(column.to_owned()), column, criteria).await
    }

    pub async fn max(&self, column: &str, criteria: Option<Criteria>) -> Result<Option<Value>> {
        self.extreme(Aggregate::Max(column.to_owned()), column, criteria).await
    }

    async fn extreme(&self, aggregate: Aggregate, column: &str, criteria: Option<Criteria>) -> Result<Option<Value>> {
        let statement = Select::table(&self.name)
            .aggregate(aggregate)
            .filter(self.filter(criteria)?)
            .build();
        let rows = self.read(statement).await?;
        match rows.into_iter().next() {
            Some(row) => {
                let value = self.single(column, row, CastOptions::default())?;
                Ok(Some(value).filter(|v| !v.is_null()))
            }
            None => Ok(None),
        }
    }

    // ------------- Hooks -------------
    pub fn before_create<F, Fut>(&self, hook: F) -> HookId
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.before_create.add(hook)
    }

    pub fn after_create<F, Fut>(&self, hook: F) -> HookId
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.after_create.add(hook)
    }

    pub fn before_update<F, Fut>(&self, hook: F) -> HookId
    where
        F: Fn(UpdateArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.before_update.add(hook)
    }

    pub fn after_update<F, Fut>(&self, hook: F) -> HookId
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.after_update.add(hook)
    }

    pub fn before_remove<F, Fut>(&self, hook: F) -> HookId
    where
        F: Fn(Criteria) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.before_remove.add(hook)
    }

    pub fn after_remove<F, Fut>(&self, hook: F) -> HookId
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.after_remove.add(hook)
    }

    /// Observes the statements run on behalf of this model.
    pub fn on_query<F, Fut>(&self, include_internal: bool, hook: F) -> HookId
    where
        F: Fn(QueryEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.router.observers().add(Some(&self.name), include_internal, hook)
    }

    pub fn unsubscribe(&self, id: HookId) -> bool {
        self.hooks.remove(id) || self.router.observers().remove(id)
    }

    // ------------- Plumbing -------------
    fn filter(&self, criteria: Option<Criteria>) -> Result<Filter> {
        let mut filter = Filter::new();
        if let Some(criteria) = criteria {
            let criteria = self
                .cast
                .serialize_criteria(criteria.normalize(), CastOptions::default())?;
            build_predicate(&mut filter, &criteria);
        }
        Ok(filter)
    }

    async fn read(&self, statement: Statement) -> Result<Vec<Row>> {
        self.router
            .unit(UnitKind::Read, Some(&self.name), move |session| session.query(&statement, false))
            .await
    }

    async fn mutate(&self, event: CaptureEvent, statement: Statement) -> Result<Captured> {
        let name = self.name.clone();
        let columns = self.schema.names();
        self.router
            .unit(UnitKind::Write, Some(&self.name), move |session: &mut Session<'_>| {
                capture(session, &name, &name, event, &columns, &statement)
            })
            .await
    }

    fn records(&self, captured: Captured) -> Result<Vec<Record>> {
        captured
            .rows
            .into_iter()
            .map(|row| self.cast.deserialize(row, CastOptions::default()))
            .collect()
    }

    fn single(&self, column: &str, row: Row, options: CastOptions) -> Result<Value> {
        let value = row
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .unwrap_or(StorageValue::Null);
        self.cast.deserialize_column(column, value, options)
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

// `data` wins over values taken from the criteria
fn merge(criteria: &Criteria, data: Record) -> Record {
    let mut merged = Record::new();
    if let Criteria::Object(pairs) = criteria {
        for (column, value) in pairs {
            merged.insert(column.clone(), value.clone());
        }
    }
    for (column, value) in data {
        merged.insert(column, value);
    }
    merged
}

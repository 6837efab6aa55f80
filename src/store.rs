//! The store: one router, and the registry of models defined on it.

use std::collections::HashMap;
use std::future::Future;
use std::hash::BuildHasherDefault;
use std::sync::{Arc, Mutex, MutexGuard};

// we will use a fast hashing algo for the registry, keys are model names
use seahash::SeaHasher;
use tracing::info;

use crate::cast::Record;
use crate::config::StoreConfig;
use crate::criteria::Criteria;
use crate::error::{Result, TroveError};
use crate::hooks::{HookId, HookResult, QueryEvent, UpdateArgs};
use crate::model::Model;
use crate::router::{ExecuteOptions, QueryResult, Router, Session, Strategy, UnitKind};
use crate::schema::{ModelOptions, Schema};
use crate::sql::{self, Statement};

type Registry = HashMap<String, Arc<Model>, BuildHasherDefault<SeaHasher>>;

pub struct Store {
    config: StoreConfig,
    router: Arc<Router>,
    models: Mutex<Registry>,
}

impl Store {
    pub async fn open(config: StoreConfig) -> Result<Store> {
        let opening = config.clone();
        // restoring a snapshot reads the whole file
        let router = tokio::task::spawn_blocking(move || Router::open(&opening)).await??;
        Ok(Store {
            config,
            router: Arc::new(router),
            models: Mutex::new(Registry::default()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn strategy(&self) -> Strategy {
        self.router.strategy()
    }

    /// Defines a model, or returns the one already defined under `name`.
    /// A model that already exists keeps its original schema.
    pub async fn model(&self, name: &str, schema: Schema, options: ModelOptions) -> Result<Arc<Model>> {
        if let Some(model) = self.get_model(name) {
            return Ok(model);
        }
        let model = Arc::new(Model::define(Arc::clone(&self.router), name, schema, options).await?);
        // two concurrent definitions agree on whichever registered first
        let model = self
            .registry()
            .entry(name.to_owned())
            .or_insert(model)
            .clone();
        Ok(model)
    }

    pub fn get_model(&self, name: &str) -> Option<Arc<Model>> {
        self.registry().get(name).cloned()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.registry().contains_key(name)
    }

    /// Drops the model's table and forgets the model. Answers false for a name
    /// that was never defined, in which case nothing is issued. A model whose
    /// table could not be dropped stays registered.
    pub async fn drop_model(&self, name: &str) -> Result<bool> {
        if !self.has_model(name) {
            return Ok(false);
        }
        let statement = sql::drop_table(name);
        self.router
            .unit(UnitKind::Write, Some(name), move |session| session.run(&statement, false))
            .await?;
        self.registry().remove(name);
        info!(model = name, "model dropped");
        Ok(true)
    }

    /// Runs a raw statement.
    pub async fn execute(&self, statement: impl Into<Statement>, options: ExecuteOptions) -> Result<QueryResult> {
        self.router.execute(statement.into(), options).await
    }

    /// Runs `work` as one transaction with exclusive use of a connection.
    pub async fn unit<T, F>(&self, kind: UnitKind, work: F) -> Result<T>
    where
        F: FnOnce(&mut Session<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.router.unit(kind, None, work).await
    }

    /// User tables, by name.
    pub async fn tables(&self) -> Result<Vec<String>> {
        let rows = self
            .router
            .unit(UnitKind::Read, None, |session| session.query(&sql::list_tables(), true))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|(_, name)| name.as_text().map(str::to_owned))
            .collect())
    }

    /// Writes a final snapshot for a pooled store backed by a file.
    pub async fn close(self) -> Result<()> {
        self.router.flush().await?;
        info!(path = %self.config.path, "store closed");
        Ok(())
    }

    // ------------- Hooks -------------
    /// Observes every statement run through the store.
    pub fn on_query<F, Fut>(&self, include_internal: bool, hook: F) -> HookId
    where
        F: Fn(QueryEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.router.observers().add(None, include_internal, hook)
    }

    pub fn before_create<F, Fut>(&self, model: &str, hook: F) -> Result<HookId>
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Ok(self.require(model)?.before_create(hook))
    }

    pub fn after_create<F, Fut>(&self, model: &str, hook: F) -> Result<HookId>
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Ok(self.require(model)?.after_create(hook))
    }

    pub fn before_update<F, Fut>(&self, model: &str, hook: F) -> Result<HookId>
    where
        F: Fn(UpdateArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Ok(self.require(model)?.before_update(hook))
    }

    pub fn after_update<F, Fut>(&self, model: &str, hook: F) -> Result<HookId>
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Ok(self.require(model)?.after_update(hook))
    }

    pub fn before_remove<F, Fut>(&self, model: &str, hook: F) -> Result<HookId>
    where
        F: Fn(Criteria) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Ok(self.require(model)?.before_remove(hook))
    }

    pub fn after_remove<F, Fut>(&self, model: &str, hook: F) -> Result<HookId>
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Ok(self.require(model)?.after_remove(hook))
    }

    pub fn unsubscribe(&self, id: HookId) -> bool {
        if self.router.observers().remove(id) {
            return true;
        }
        let models: Vec<Arc<Model>> = self.registry().values().cloned().collect();
        models.iter().any(|model| model.unsubscribe(id))
    }

    fn require(&self, name: &str) -> Result<Arc<Model>> {
        self.get_model(name)
            .ok_or_else(|| TroveError::UnknownModel(name.to_owned()))
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.models.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

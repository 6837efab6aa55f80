//! The execution router.
//!
//! Two strategies, picked once when the store opens:
//!
//! * **Direct** – a file backed SQLite database opened for every unit of
//!   work. Isolation is SQLite's own; change capture objects are TEMP and
//!   therefore private to the connection that made them.
//! * **Pooled** – one in-memory connection behind a single slot async mutex.
//!   Every statement against it is totally ordered. After a unit of work
//!   that changed data, the whole database is written to the backing file.
//!
//! Work is submitted as a closure over a [`Session`] and runs inside one
//! transaction on the blocking thread pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::backup::Progress;
use rusqlite::config::DbConfig;
use rusqlite::{params_from_iter, Connection, TransactionBehavior, MAIN_DB};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use crate::cast::Row;
use crate::config::{Client, StoreConfig};
use crate::error::Result;
use crate::hooks::{QueryEvent, QueryHooks};
use crate::sql::{self, Statement};
use crate::types::StorageValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Pooled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Return the rows the statement produced instead of a change count.
    pub need_response: bool,
    /// The statement was issued by the store itself.
    pub internal: bool,
}

impl ExecuteOptions {
    pub fn rows() -> Self {
        Self {
            need_response: true,
            internal: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows(Vec<Row>),
    Affected(usize),
    /// The answer to an introspection statement: does the thing exist?
    Present(bool),
}

// ------------- Session -------------
/// A connection lent to a unit of work. Records every statement it runs so
/// observers can be told about them, and whether anything was written.
pub struct Session<'c> {
    connection: &'c Connection,
    model: Option<String>,
    log: Vec<QueryEvent>,
    dirty: bool,
}

impl<'c> Session<'c> {
    fn new(connection: &'c Connection, model: Option<String>) -> Self {
        Self {
            connection,
            model,
            log: Vec::new(),
            dirty: false,
        }
    }

    /// Runs a statement that returns no rows, answering the change count.
    pub fn run(&mut self, statement: &Statement, internal: bool) -> Result<usize> {
        self.record(statement, internal);
        let affected = self
            .connection
            .execute(&statement.sql, params_from_iter(statement.params.iter()))?;
        self.dirty = true;
        Ok(affected)
    }

    pub fn query(&mut self, statement: &Statement, internal: bool) -> Result<Vec<Row>> {
        self.record(statement, internal);
        let mut prepared = self.connection.prepare(&statement.sql)?;
        if !prepared.readonly() {
            self.dirty = true;
        }
        let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
        let mut rows = prepared.query(params_from_iter(statement.params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Row::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                values.push((name.clone(), row.get::<_, StorageValue>(i)?));
            }
            result.push(values);
        }
        Ok(result)
    }

    pub fn execute(&mut self, statement: &Statement, options: ExecuteOptions) -> Result<QueryResult> {
        if sql::is_introspection(&statement.sql) {
            let rows = self.query(statement, options.internal)?;
            return Ok(QueryResult::Present(!rows.is_empty()));
        }
        if options.need_response {
            return Ok(QueryResult::Rows(self.query(statement, options.internal)?));
        }
        let (columns, readonly) = {
            let prepared = self.connection.prepare(&statement.sql)?;
            (prepared.column_count(), prepared.readonly())
        };
        if columns == 0 {
            return Ok(QueryResult::Affected(self.run(statement, options.internal)?));
        }
        // row producing statements are stepped to completion and their rows dropped
        let rows = self.query(statement, options.internal)?;
        Ok(QueryResult::Affected(if readonly { 0 } else { rows.len() }))
    }

    fn record(&mut self, statement: &Statement, internal: bool) {
        debug!(internal, sql = %statement, "execute");
        self.log.push(QueryEvent {
            model: self.model.clone(),
            sql: statement.sql.clone(),
            params: statement.params.clone(),
            internal,
        });
    }
}

// ------------- Router -------------
enum Handle {
    /// One connection everybody takes turns with.
    Shared(Arc<Mutex<Connection>>),
    /// A database file, opened per unit of work.
    File(PathBuf),
}

pub struct Router {
    strategy: Strategy,
    handle: Handle,
    snapshot: Option<PathBuf>,
    busy_timeout: Duration,
    observers: QueryHooks,
}

impl Router {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.resolved_path();
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let (strategy, handle, snapshot) = match (config.client, path) {
            (Client::Embedded, path) => {
                let mut connection = Connection::open_in_memory()?;
                strict_quotes(&connection)?;
                if let Some(path) = &path {
                    if path.exists() {
                        connection.restore(MAIN_DB, path, None::<fn(Progress)>)?;
                        info!(path = %path.display(), "restored snapshot");
                    } else {
                        ensure_parent(path)?;
                    }
                }
                (Strategy::Pooled, Handle::Shared(Arc::new(Mutex::new(connection))), path)
            }
            (Client::Native, Some(path)) => {
                ensure_parent(&path)?;
                let connection = open_file(&path, busy_timeout)?;
                connection.query_row("pragma journal_mode = wal", [], |_| Ok(()))?;
                (Strategy::Direct, Handle::File(path), None)
            }
            (Client::Native, None) => {
                let connection = Connection::open_in_memory()?;
                strict_quotes(&connection)?;
                (Strategy::Direct, Handle::Shared(Arc::new(Mutex::new(connection))), None)
            }
        };
        info!(?strategy, path = %config.path, "store opened");
        Ok(Self {
            strategy,
            handle,
            snapshot,
            busy_timeout,
            observers: QueryHooks::default(),
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn observers(&self) -> &QueryHooks {
        &self.observers
    }

    /// Runs `work` as one unit: one transaction, on one connection, with
    /// nothing else interleaved on a shared handle. The statements it ran are
    /// queued for observers before a shared handle is released and delivered
    /// after it is, so an observer may use the store itself.
    pub async fn unit<T, F>(&self, kind: UnitKind, model: Option<&str>, work: F) -> Result<T>
    where
        F: FnOnce(&mut Session<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let model = model.map(str::to_owned);
        match &self.handle {
            Handle::Shared(connection) => {
                let mut guard = Arc::clone(connection).lock_owned().await;
                let snapshot = self.snapshot.clone();
                let (guard, log, result) = tokio::task::spawn_blocking(move || {
                    let (log, result) = run_unit(&mut guard, kind, model, work);
                    let result = result.and_then(|(value, dirty)| {
                        if let (true, Some(path)) = (dirty, &snapshot) {
                            persist(&guard, path)?;
                        }
                        Ok(value)
                    });
                    (guard, log, result)
                })
                .await?;
                // queued while the connection is still held, so the queue
                // follows execution order
                self.observers.enqueue(log);
                drop(guard);
                self.observers.deliver().await;
                result
            }
            Handle::File(path) => {
                let path = path.clone();
                let busy_timeout = self.busy_timeout;
                let (log, result) = tokio::task::spawn_blocking(move || match open_file(&path, busy_timeout) {
                    Ok(mut connection) => run_unit(&mut connection, kind, model, work),
                    Err(e) => (Vec::new(), Err(e)),
                })
                .await?;
                self.observers.enqueue(log);
                self.observers.deliver().await;
                result.map(|(value, _)| value)
            }
        }
    }

    pub async fn execute(&self, statement: Statement, options: ExecuteOptions) -> Result<QueryResult> {
        let kind = if sql::is_read_only(&statement.sql) {
            UnitKind::Read
        } else {
            UnitKind::Write
        };
        self.unit(kind, None, move |session| session.execute(&statement, options))
            .await
    }

    /// Writes the pooled database to its backing file, if it has one.
    pub async fn flush(&self) -> Result<()> {
        if let (Handle::Shared(connection), Some(path)) = (&self.handle, &self.snapshot) {
            let guard = Arc::clone(connection).lock_owned().await;
            let path = path.clone();
            tokio::task::spawn_blocking(move || persist(&guard, &path)).await??;
        }
        Ok(())
    }
}

fn run_unit<T, F>(
    connection: &mut Connection,
    kind: UnitKind,
    model: Option<String>,
    work: F,
) -> (Vec<QueryEvent>, Result<(T, bool)>)
where
    F: FnOnce(&mut Session<'_>) -> Result<T>,
{
    let behavior = match kind {
        UnitKind::Read => TransactionBehavior::Deferred,
        UnitKind::Write => TransactionBehavior::Immediate,
    };
    let transaction = match connection.transaction_with_behavior(behavior) {
        Ok(transaction) => transaction,
        Err(e) => return (Vec::new(), Err(e.into())),
    };
    let mut session = Session::new(&transaction, model);
    let result = work(&mut session);
    let Session { log, dirty, .. } = session;
    // an uncommitted transaction rolls back when dropped
    let result = result.and_then(|value| {
        transaction.commit()?;
        Ok((value, dirty))
    });
    (log, result)
}

fn open_file(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(busy_timeout)?;
    strict_quotes(&connection)?;
    Ok(connection)
}

// double quotes always name an identifier, so an unknown column is an error
// instead of a string literal
fn strict_quotes(connection: &Connection) -> Result<()> {
    connection.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
    connection.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| crate::error::TroveError::Config(format!("{}: {e}", parent.display())))?;
    }
    Ok(())
}

/// Full snapshot: the whole in-memory database replaces the backing file.
fn persist(connection: &Connection, path: &Path) -> Result<()> {
    let started = Instant::now();
    connection.backup(MAIN_DB, path, None::<fn(Progress)>)?;
    trace!(path = %path.display(), elapsed = ?started.elapsed(), "snapshot written");
    Ok(())
}

//! Trove – a typed document store in front of SQLite.
//!
//! Callers describe a model as a light schema (column name → logical type)
//! and then create, find, update and remove plain JSON-like records. Trove
//! takes care of:
//! * casting values between their logical form ([`serde_json::Value`]) and
//!   what SQLite stores ([`types::StorageValue`]),
//! * accepting selection criteria in a few convenient shapes and turning
//!   them into one canonical where clause ([`criteria`]),
//! * handing back the rows a mutation touched, recovered through temporary
//!   triggers and scratch tables ([`capture`]),
//! * running every statement either on a database file directly or on a
//!   single in-memory connection that is written out as a full snapshot
//!   after each change ([`router`]),
//! * lifecycle hooks around create, update and remove, and an observation
//!   channel for every statement ([`hooks`]).
//!
//! ## Modules
//! * [`types`] – The closed set of column kinds and their storage conversions.
//! * [`schema`] – Column descriptors, schemas and model options.
//! * [`criteria`] – Criteria shapes, operators and predicate building.
//! * [`cast`] – Per-model serializer and deserializer.
//! * [`sql`] – Statement builders producing SQL text with bound parameters.
//! * [`capture`] – The armed trigger and scratch table guard.
//! * [`router`] – Direct and pooled execution, sessions and snapshots.
//! * [`hooks`] – Subscriber sets, cancellation and statement observation.
//! * [`model`] / [`store`] – The public surface.
//! * [`config`] – Store configuration from files and the environment.
//!
//! ## Quick Start
//! ```
//! use serde_json::json;
//! use trove::{Column, Criteria, ModelOptions, Schema, Store, StoreConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> trove::Result<()> {
//! let store = Store::open(StoreConfig::memory()).await?;
//! let schema = Schema::new([
//!     ("name", Column::string().primary()),
//!     ("age", Column::number()),
//! ])?;
//! let people = store.model("people", schema, ModelOptions::default()).await?;
//! let record = json!({"name": "Dale", "age": 30});
//! people.create(record.as_object().cloned().unwrap_or_default()).await?;
//! let dale = people.increment("age", Criteria::equals("name", "Dale"), 5).await?;
//! assert_eq!(dale[0]["age"], json!(35));
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//! With [`config::Client::Embedded`] (the default) the database lives in
//! memory and is restored from / written to `path` as a whole. The special
//! path `:memory:` is never persisted. With [`config::Client::Native`] the
//! file is used directly.

pub mod capture;
pub mod cast;
pub mod config;
pub mod criteria;
pub mod error;
pub mod hooks;
pub mod model;
pub mod router;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;

pub use cast::{CastOptions, Record, Row};
pub use config::{Client, StoreConfig};
pub use criteria::{Criteria, Operator};
pub use error::{Result, TroveError};
pub use hooks::{HookId, HookResult, QueryEvent, UpdateArgs};
pub use model::{FindOptions, Model};
pub use router::{ExecuteOptions, QueryResult, Session, Strategy, UnitKind};
pub use schema::{Column, ModelOptions, Schema};
pub use sql::{Direction, Statement};
pub use store::Store;
pub use types::{ColumnKind, StorageValue};

//! Store configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `trove.toml` (or any file given to [`StoreConfig::load`]), then `TROVE_*`
//! environment variables, e.g. `TROVE_PATH=people.db TROVE_CLIENT=native`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// The path that asks for a store that is never persisted.
pub const MEMORY: &str = ":memory:";

/// Which backend drives the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Client {
    /// SQLite on a database file, opened per unit of work.
    Native,
    /// An in-memory SQLite database behind a single writer slot, written
    /// out as a full snapshot after every change.
    #[default]
    Embedded,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file name, or `:memory:`.
    pub path: String,
    pub client: Client,
    /// Base directory a relative `path` is resolved against.
    pub directory: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: MEMORY.to_owned(),
            client: Client::default(),
            directory: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Reads `file` (if it exists) and the environment on top of the defaults.
    pub fn load(file: &str) -> Result<Self> {
        let defaults = StoreConfig::default();
        let settings = Config::builder()
            .set_default("path", defaults.path)?
            .set_default("client", "embedded")?
            .set_default("busy_timeout_ms", defaults.busy_timeout_ms as i64)?
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("TROVE"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY
    }

    /// The database file, `None` for a memory-only store.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if self.is_memory() {
            return None;
        }
        let path = PathBuf::from(&self.path);
        match &self.directory {
            Some(directory) if path.is_relative() => Some(directory.join(path)),
            _ => Some(path),
        }
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TroveError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Type error on column '{column}': {message}")]
    Type { column: String, message: String },
    #[error("Column '{column}' of model '{model}' is not nullable")]
    Nullability { model: String, column: String },
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),
    #[error("Could not arm change capture on '{model}': {message}")]
    CaptureSetup { model: String, message: String },
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, TroveError>;

impl TroveError {
    pub fn type_error(column: &str, message: impl Into<String>) -> Self {
        Self::Type {
            column: column.to_owned(),
            message: message.into(),
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for TroveError {
    fn from(e: rusqlite::Error) -> Self { Self::Backend(e.to_string()) }
}
impl From<config::ConfigError> for TroveError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<tokio::task::JoinError> for TroveError {
    fn from(e: tokio::task::JoinError) -> Self { Self::Worker(e.to_string()) }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("fetch failed for '{reference}': {message}")]
    Fetch { reference: String, message: String },

    #[error("store failed for '{url}': {message}")]
    Store { url: String, message: String },

    #[error("log delivery failed: {0}")]
    Log(String),

    #[error("data source does not define '{0}'")]
    Unsupported(&'static str),
}

pub type DataSourceResult<T> = Result<T, DataSourceError>;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Success,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// The injected external-I/O collaborator.
///
/// The core performs no network or storage I/O itself; connectors and the
/// `$PUT`/`$POST` writers delegate to whatever implements this trait.
/// `put`, `post` and `log` are optional capabilities: implementors opt in by
/// overriding the method together with its `supports_*` flag.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch the value behind an opaque reference string.
    async fn get(&self, reference: &str) -> DataSourceResult<Value>;

    async fn put(&self, url: &str, data: Value) -> DataSourceResult<Value> {
        let _ = (url, data);
        Err(DataSourceError::Unsupported("put"))
    }

    async fn post(&self, url: &str, data: Value) -> DataSourceResult<Value> {
        let _ = (url, data);
        Err(DataSourceError::Unsupported("post"))
    }

    /// Deliver a log entry on behalf of the engine.
    async fn log(&self, entry: LogEntry) -> DataSourceResult<()> {
        let _ = entry;
        Err(DataSourceError::Unsupported("log"))
    }

    fn supports_put(&self) -> bool {
        false
    }

    fn supports_post(&self) -> bool {
        false
    }

    fn supports_log(&self) -> bool {
        false
    }
}

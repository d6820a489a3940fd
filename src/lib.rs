//! firemacro: a macro interpreter that merges templates against a layered
//! context.
//!
//! A model is any JSON-like tree. Strings may embed `{path}` macros that
//! resolve against a stack of data frames; objects may carry directive keys
//! (`$DATA`, `$EACH`, `$IF`, ...) that fetch, transform or observe during
//! the merge. All external I/O goes through an injected [`DataSource`].
//!
//! ```no_run
//! use firemacro::{FireMacro, MacroOptions, Value};
//! use serde_json::json;
//!
//! # async fn demo() -> firemacro::MacroResult<()> {
//! let engine = FireMacro::new(
//!     Value::from(json!({"line": "{qty} x {item}"})),
//!     MacroOptions::default(),
//! );
//! let merged = engine
//!     .parse_with(vec![Value::from(json!({"qty": 3, "item": "widget"}))])
//!     .await?;
//! assert_eq!(merged, Value::from(json!({"line": "3 x widget"})));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod datasource;
pub mod directive;
pub mod engine;
pub mod error;
pub(crate) mod helpers;
pub(crate) mod resolver;
pub(crate) mod tokenizer;
pub mod value;

pub use config::MacroOptions;
pub use datasource::{DataSource, DataSourceError, DataSourceResult, LogEntry, LogLevel};
pub use engine::FireMacro;
pub use error::{MacroError, MacroResult};
pub use value::{normalize, Value};

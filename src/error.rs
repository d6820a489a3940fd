use thiserror::Error;

use crate::datasource::DataSourceError;

#[derive(Error, Debug)]
pub enum MacroError {
    #[error("data source error: {0}")]
    DataSource(#[from] DataSourceError),
}

pub type MacroResult<T> = Result<T, MacroError>;

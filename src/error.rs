use std::io;
use std::path::PathBuf;

use polars::prelude::{DataType, PolarsError};
use thiserror::Error;

use crate::records::FieldType;

pub type Result<T> = std::result::Result<T, EdaError>;

#[derive(Error, Debug)]
pub enum EdaError {
    #[error("cannot access {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("column {column:?} row {row}: cannot convert {value:?} to {target}")]
    Cast {
        column: String,
        row: usize,
        value: String,
        target: FieldType,
    },
    #[error("column {column:?} of type {dtype} cannot be cast to {target}")]
    UnsupportedCast {
        column: String,
        dtype: DataType,
        target: FieldType,
    },
    #[error("column {column:?} of type {dtype} is not a timestamp")]
    NotTimestamp { column: String, dtype: DataType },
    #[error("invalid buckets: {0}")]
    Buckets(String),
    #[error("negative ages present but no valid age to replace them with")]
    NoValidAges,
    #[error("unsupported output format {path:?}")]
    OutputFormat { path: PathBuf },
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl EdaError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EdaError::Io { path: path.into(), source }
    }
}

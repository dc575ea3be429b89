use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors. Data-quality problems are recovered in place and only
/// reported through `RunReport`; everything here aborts the run.
#[derive(Debug, Error)]
pub enum NeedError {
    #[error("required input table `{table}` not found at {}", .path.display())]
    MissingInput { table: &'static str, path: PathBuf },

    #[error("table `{table}` is missing required column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("table `{table}` row {row}: column `{column}` has invalid value {value:?}")]
    InvalidValue {
        table: String,
        row: usize,
        column: String,
        value: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed cluster point file: {0}")]
    MalformedPoints(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NeedError {
    pub(crate) fn missing_column(table: &str, column: &str) -> Self {
        Self::MissingColumn { table: table.to_string(), column: column.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, NeedError>;

//! Tabular layer: per-run metadata and long-format exports.

pub mod recorder;
pub mod schema;
pub mod tabular;

pub use recorder::{FLATTENED_SECTIONS, METADATA_FILE, MetadataRecorder, RunMetadata, flatten};
pub use schema::{Check, ColumnSpec, ColumnType, MetadataRow, MetadataSchema, column_name};
pub use tabular::{long_format_batch, long_format_file_name, write_long_format};

use std::path::PathBuf;

use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub row: usize,
    pub column: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata schema violated in columns {columns:?}")]
    SchemaValidation {
        columns: Vec<String>,
        violations: Vec<Violation>,
    },

    #[error("cannot write tabular output at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot flatten parameters")]
    Serialize(#[from] serde_json::Error),

    #[error("cannot build record batch")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet write failed")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            _ => ErrorKind::Storage,
        }
    }
}

pub mod parser;
pub mod silver;
pub mod types;

pub use parser::{ResultsParser, grid_file_names, mask_file_name, states_file_name};
pub use silver::{read_silver, silver_file_name, write_silver};
pub use types::{GridShape, ParsedRun, StateMetadata, StateSnapshot};

use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::staging::ContentId;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("results file {} not found", .path.display())]
    MissingResultsFile { path: PathBuf },

    #[error("cannot read results at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed results file {}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("grid shape in {} must be three positive integers, got {values:?}", .path.display())]
    InvalidGrid { path: PathBuf, values: Vec<i64> },

    #[error(
        "run {content_id} timestep {timestep}: {pressure} pressures and {saturation} saturations for {active} active cells"
    )]
    DataConsistency {
        content_id: ContentId,
        timestep: usize,
        pressure: usize,
        saturation: usize,
        active: usize,
    },
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::MissingResultsFile { .. } => ErrorKind::MissingResultsFile,
            ParseError::Io { .. } => ErrorKind::Storage,
            ParseError::Json { .. } | ParseError::InvalidGrid { .. } | ParseError::DataConsistency { .. } => {
                ErrorKind::DataConsistency
            }
        }
    }
}

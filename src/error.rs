//! Crate-level error type.
//!
//! Each component owns a closed error enum; [`Error`] wraps them without
//! flattening the cause chain, and [`Error::kind`] gives callers a stable
//! classification to branch on.

use crate::config::ConfigError;
use crate::consolidate::{ConsolidationError, UploadError};
use crate::lake::LakeError;
use crate::metadata::MetadataError;
use crate::params::PlanError;
use crate::results::ParseError;
use crate::solver::SolverError;
use crate::staging::StageError;
use crate::status::StatusError;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of every failure the pipeline can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    MissingSection,
    MissingResultsFile,
    StagingIo,
    SolverExecution,
    DataConsistency,
    Consolidation,
    SchemaValidation,
    InvalidStatus,
    Upload,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Lake(#[from] LakeError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(e) => e.kind(),
            Error::Plan(_) => ErrorKind::Configuration,
            Error::Stage(e) => e.kind(),
            Error::Status(e) => e.kind(),
            Error::Solver(_) => ErrorKind::SolverExecution,
            Error::Parse(e) => e.kind(),
            Error::Consolidation(e) => e.kind(),
            Error::Upload(_) => ErrorKind::Upload,
            Error::Metadata(e) => e.kind(),
            Error::Lake(_) => ErrorKind::Storage,
        }
    }
}

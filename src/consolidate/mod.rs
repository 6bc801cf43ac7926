//! Sparse-to-dense reconstruction and golden-layer persistence.

pub mod codec;
pub mod scatter;
pub mod upload;
pub mod writer;

pub use codec::Codec;
pub use scatter::{ConsolidatedTensors, consolidate, gather_active, required_bytes};
pub use upload::{LocalObjectStore, MemoryObjectStore, ObjectStore, UploadError, object_key, upload_file};
pub use writer::{GoldenArtifact, GoldenWriter};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::results::GridShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Pressure,
    WaterSaturation,
    GasSaturation,
}

impl Quantity {
    pub const ALL: [Quantity; 3] = [Quantity::Pressure, Quantity::WaterSaturation, Quantity::GasSaturation];

    pub fn as_str(self) -> &'static str {
        match self {
            Quantity::Pressure => "pressure",
            Quantity::WaterSaturation => "water_saturation",
            Quantity::GasSaturation => "gas_saturation",
        }
    }

    pub fn parse(raw: &str) -> Option<Quantity> {
        Quantity::ALL.into_iter().find(|q| q.as_str() == raw.trim())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    #[error("no timesteps to consolidate")]
    NoTimesteps,

    #[error("grid dimensions {dims:?} must all be positive")]
    InvalidDimensions { dims: GridShape },

    #[error("timestep {timestep} has dimensions {found:?}, expected {expected:?}")]
    DimensionMismatch {
        timestep: usize,
        expected: GridShape,
        found: GridShape,
    },

    #[error("timestep {timestep}: {pressure} pressures and {saturation} saturations for {active} active cells")]
    SizeMismatch {
        timestep: usize,
        pressure: usize,
        saturation: usize,
        active: usize,
    },

    #[error("timestep {timestep}: cell {index} outside a grid of {total} cells")]
    IndexOutOfRange {
        timestep: usize,
        index: usize,
        total: usize,
    },

    #[error("dense tensors need {required_bytes} bytes, budget is {budget_bytes}")]
    OverBudget { required_bytes: u64, budget_bytes: u64 },

    #[error("tensor shape error")]
    Shape(#[from] ndarray::ShapeError),

    #[error("golden io at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}", .path.display())]
    WriteNpy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpyError,
    },

    #[error("cannot read {}", .path.display())]
    ReadNpy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("cannot write {}", .path.display())]
    WriteNpz {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpzError,
    },

    #[error("cannot read {}", .path.display())]
    ReadNpz {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },

    #[error("chunked store {} is corrupt: {detail}", .path.display())]
    CorruptStore { path: PathBuf, detail: String },
}

impl ConsolidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsolidationError::Io { .. } => ErrorKind::Storage,
            _ => ErrorKind::Consolidation,
        }
    }
}

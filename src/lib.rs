//! Parameter sweeps for CO2 injection studies: plan variants, stage them for
//! an external reservoir solver, and rebuild its sparse per-cell output into
//! dense `(x, y, z, t)` tensors inside a layered data lake.

pub mod config;
pub mod consolidate;
pub mod error;
pub mod lake;
pub mod metadata;
pub mod params;
pub mod results;
pub mod runtime;
pub mod solver;
pub mod staging;
pub mod status;

pub use error::{Error, ErrorKind, Result};

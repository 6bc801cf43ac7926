//! Layered data lake and the batch pipeline that walks it.

pub mod layers;
pub mod pipeline;

pub use layers::{DataLake, LakeEvent, Layer};
pub use pipeline::{BatchReport, FailedRun, Pipeline, PipelineOptions, SkipReason, SkippedRun, plan_sweep};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LakeError {
    #[error("data lake io at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub mod cache;
pub mod parameter;
pub mod planner;
pub mod types;

pub use cache::DedupCache;
pub use parameter::{Parameter, PhysicalLimits, limited_fields, physical_limits};
pub use planner::{PlannedRun, SweepPlanner, VariationConfig, VariationSummary, combination_count};
pub use types::*;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("variation delta {delta} must lie in [0, 1]")]
    InvalidDelta { delta: f64 },

    #[error("section {section} is not present in the base parameters")]
    MissingSection { section: SectionName },

    #[error("field {field:?} not found in section {section}")]
    UnknownField { section: SectionName, field: String },

    #[error("field {field:?} is not numeric")]
    NonNumericField {
        section: Option<SectionName>,
        field: String,
    },

    #[error("base value {value} of {name} is outside physical limits [{min}, {max}]")]
    OutOfPhysicalLimits {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("derived range of {name} does not intersect its physical limits")]
    EmptyRange { name: String },

    #[error("{points} points over {fields} fields is more combinations than a sweep can number")]
    TooManyCombinations { points: usize, fields: usize },

    #[error("cannot convert parameter section")]
    Serialize(#[from] serde_json::Error),

    #[error("dedup cache io at {}", .path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

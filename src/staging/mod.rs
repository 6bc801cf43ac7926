pub mod hash;
pub mod stager;

pub use hash::{CONTENT_ID_LEN, ContentId, canonical_json, content_id};
pub use stager::{InputStager, STAGING_REQUIRED, StagedRun, artifact_name};

use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::params::SectionName;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("missing required sections: {sections:?}")]
    MissingSections { sections: Vec<SectionName> },

    #[error("parameter set #{sequence_number} has no content id assigned")]
    MissingContentId { sequence_number: u32 },

    #[error("staging io at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize staged section")]
    Serialize(#[from] serde_json::Error),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::MissingSections { .. } => ErrorKind::MissingSection,
            StageError::MissingContentId { .. } => ErrorKind::Configuration,
            StageError::Io { .. } | StageError::Serialize(_) => ErrorKind::StagingIo,
        }
    }
}

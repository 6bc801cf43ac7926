use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{ContentId, StageError};
use crate::params::{ParameterSet, SectionName};

/// Sections the solver cannot start without.
pub const STAGING_REQUIRED: [SectionName; 5] = [
    SectionName::Paths,
    SectionName::Execution,
    SectionName::Fluid,
    SectionName::PreProcessing,
    SectionName::SimNums,
];

pub const ARTIFACT_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct StagedRun {
    pub content_id: ContentId,
    pub sequence_number: u32,
    pub dir: PathBuf,
    pub artifacts: Vec<PathBuf>,
}

/// Writes one artifact per section under `<root>/<content_id>/`.
pub struct InputStager {
    root: PathBuf,
}

pub fn artifact_name(section: SectionName, id: &ContentId) -> String {
    format!("{}_{}.{}", section.file_stem(), id, ARTIFACT_EXT)
}

impl InputStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, id: &ContentId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Stages `params`; running it again for the same id overwrites in place.
    pub fn stage(&self, params: &ParameterSet) -> Result<StagedRun, StageError> {
        let missing = params.missing_sections(&STAGING_REQUIRED);
        if !missing.is_empty() {
            return Err(StageError::MissingSections { sections: missing });
        }
        let id = params.content_id().cloned().ok_or(StageError::MissingContentId {
            sequence_number: params.sequence_number(),
        })?;

        let dir = self.dir_for(&id);
        fs::create_dir_all(&dir).map_err(|source| StageError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut artifacts = Vec::new();
        for (section, map) in params.sections()? {
            let path = dir.join(artifact_name(section, &id));
            let body = serde_json::to_vec_pretty(&map)?;
            fs::write(&path, body).map_err(|source| StageError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(content_id = %id, artifact = %path.display(), "wrote staged section");
            artifacts.push(path);
        }

        info!(content_id = %id, files = artifacts.len(), "staged inputs");
        Ok(StagedRun {
            content_id: id,
            sequence_number: params.sequence_number(),
            dir,
            artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::test_support::base_parameters;
    use crate::staging::content_id;

    fn with_id(mut params: ParameterSet) -> ParameterSet {
        let id = content_id(&params.section_map(SectionName::Fluid).unwrap().unwrap());
        params.sim_nums_mut().content_id = Some(id);
        params
    }

    #[test]
    fn writes_one_artifact_per_section() {
        let tmp = tempfile::tempdir().unwrap();
        let stager = InputStager::new(tmp.path());
        let params = with_id(base_parameters());
        let id = params.content_id().cloned().unwrap();

        let staged = stager.stage(&params).unwrap();
        assert_eq!(staged.artifacts.len(), SectionName::ALL.len());
        let pre = staged.dir.join(format!("PreProcessing_{id}.json"));
        assert!(pre.is_file());

        let fluid: serde_json::Value =
            serde_json::from_slice(&fs::read(staged.dir.join(format!("Fluid_{id}.json"))).unwrap()).unwrap();
        assert_eq!(fluid["pres_ref"], 10.0);
    }

    #[test]
    fn restaging_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let stager = InputStager::new(tmp.path());
        let mut params = with_id(base_parameters());
        stager.stage(&params).unwrap();

        params.wells.as_mut().unwrap().co2_inj = 2.0e9;
        let staged = stager.stage(&params).unwrap();
        let id = staged.content_id;
        let wells: serde_json::Value =
            serde_json::from_slice(&fs::read(staged.dir.join(format!("Wells_{id}.json"))).unwrap()).unwrap();
        assert_eq!(wells["CO2_inj"], 2.0e9);
    }

    #[test]
    fn missing_required_sections_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut params = with_id(base_parameters());
        params.execution = None;
        params.paths = None;
        match InputStager::new(tmp.path()).stage(&params) {
            Err(StageError::MissingSections { sections }) => {
                assert_eq!(sections, vec![SectionName::Paths, SectionName::Execution]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unassigned_content_id_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = InputStager::new(tmp.path()).stage(&base_parameters()).unwrap_err();
        assert!(matches!(err, StageError::MissingContentId { .. }));
    }
}

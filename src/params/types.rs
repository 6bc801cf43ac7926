use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::staging::ContentId;

/// Solver-specific keys we do not model; staged untouched.
pub type Passthrough = BTreeMap<String, Value>;

/// Known top-level sections of a setup file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SectionName {
    Paths,
    #[serde(rename = "Pre-Processing")]
    PreProcessing,
    Grid,
    Fluid,
    #[serde(rename = "Initial Conditions")]
    InitialConditions,
    #[serde(rename = "Boundary Conditions")]
    BoundaryConditions,
    Wells,
    Schedule,
    Execution,
    SimNums,
}

impl SectionName {
    pub const ALL: [SectionName; 10] = [
        SectionName::Paths,
        SectionName::PreProcessing,
        SectionName::Grid,
        SectionName::Fluid,
        SectionName::InitialConditions,
        SectionName::BoundaryConditions,
        SectionName::Wells,
        SectionName::Schedule,
        SectionName::Execution,
        SectionName::SimNums,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionName::Paths => "Paths",
            SectionName::PreProcessing => "Pre-Processing",
            SectionName::Grid => "Grid",
            SectionName::Fluid => "Fluid",
            SectionName::InitialConditions => "Initial Conditions",
            SectionName::BoundaryConditions => "Boundary Conditions",
            SectionName::Wells => "Wells",
            SectionName::Schedule => "Schedule",
            SectionName::Execution => "Execution",
            SectionName::SimNums => "SimNums",
        }
    }

    /// Name usable inside a filename: spaces and hyphens removed.
    pub fn file_stem(self) -> String {
        self.as_str().replace(['-', ' '], "")
    }

    /// Prefix of tabular columns: lowercased, spaces/hyphens to underscores.
    pub fn column_prefix(self) -> String {
        column_token(self.as_str())
    }

    /// Accepts the display name or the sanitized stem, case-insensitively.
    pub fn parse(raw: &str) -> Option<SectionName> {
        let wanted = raw.trim().replace(['-', ' ', '_'], "").to_ascii_lowercase();
        SectionName::ALL
            .into_iter()
            .find(|s| s.file_stem().to_ascii_lowercase() == wanted)
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn column_token(raw: &str) -> String {
    raw.replace([' ', '-'], "_").to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsSection {
    pub root: PathBuf,
    pub results: PathBuf,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreProcessingSection {
    pub case_name: String,
    pub file_basename: String,
    pub model_name: String,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSection {
    pub file_path: PathBuf,
    #[serde(default)]
    pub repair_flag: bool,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluidSection {
    pub pres_ref: f64,
    pub temp_ref: f64,
    pub cp_rock: f64,
    pub srw: f64,
    pub src: f64,
    pub pe: f64,
    #[serde(rename = "XNaCl", alias = "xnacl")]
    pub xnacl: f64,
    pub rho_h2o: f64,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialConditionsSection {
    pub sw_0: f64,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConditionsSection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellsSection {
    #[serde(rename = "CO2_inj", alias = "co2_inj")]
    pub co2_inj: f64,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSection {
    pub injection_time: f64,
    pub migration_time: f64,
    pub injection_timesteps: f64,
    pub migration_timesteps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection_rampup_dt_initial: Option<f64>,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSection {
    pub solver_bin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolbox_root: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Passthrough,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimNumsSection {
    #[serde(default)]
    pub sim_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_folder: Option<String>,
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// Full configuration of one simulation variant.
///
/// Sections are optional at the type level so that partially built sets can
/// be represented and rejected with a precise error; the setup loader and the
/// stager decide which sections are required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    #[serde(rename = "Paths", default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<PathsSection>,
    #[serde(rename = "Pre-Processing", default, skip_serializing_if = "Option::is_none")]
    pub pre_processing: Option<PreProcessingSection>,
    #[serde(rename = "Grid", default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridSection>,
    #[serde(rename = "Fluid", default, skip_serializing_if = "Option::is_none")]
    pub fluid: Option<FluidSection>,
    #[serde(rename = "Initial Conditions", default, skip_serializing_if = "Option::is_none")]
    pub initial_conditions: Option<InitialConditionsSection>,
    #[serde(rename = "Boundary Conditions", default, skip_serializing_if = "Option::is_none")]
    pub boundary_conditions: Option<BoundaryConditionsSection>,
    #[serde(rename = "Wells", default, skip_serializing_if = "Option::is_none")]
    pub wells: Option<WellsSection>,
    #[serde(rename = "Schedule", default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSection>,
    #[serde(rename = "Execution", default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSection>,
    #[serde(rename = "SimNums", default, skip_serializing_if = "Option::is_none")]
    pub sim_nums: Option<SimNumsSection>,
}

fn to_map<T: Serialize>(section: &T) -> serde_json::Result<Map<String, Value>> {
    match serde_json::to_value(section)? {
        Value::Object(map) => Ok(map),
        other => Ok(Map::from_iter([("value".to_string(), other)])),
    }
}

impl ParameterSet {
    pub fn has_section(&self, name: SectionName) -> bool {
        match name {
            SectionName::Paths => self.paths.is_some(),
            SectionName::PreProcessing => self.pre_processing.is_some(),
            SectionName::Grid => self.grid.is_some(),
            SectionName::Fluid => self.fluid.is_some(),
            SectionName::InitialConditions => self.initial_conditions.is_some(),
            SectionName::BoundaryConditions => self.boundary_conditions.is_some(),
            SectionName::Wells => self.wells.is_some(),
            SectionName::Schedule => self.schedule.is_some(),
            SectionName::Execution => self.execution.is_some(),
            SectionName::SimNums => self.sim_nums.is_some(),
        }
    }

    pub fn missing_sections(&self, required: &[SectionName]) -> Vec<SectionName> {
        required
            .iter()
            .copied()
            .filter(|s| !self.has_section(*s))
            .collect()
    }

    /// Section as a JSON object, `None` when the section is absent.
    pub fn section_map(&self, name: SectionName) -> serde_json::Result<Option<Map<String, Value>>> {
        let map = match name {
            SectionName::Paths => self.paths.as_ref().map(to_map),
            SectionName::PreProcessing => self.pre_processing.as_ref().map(to_map),
            SectionName::Grid => self.grid.as_ref().map(to_map),
            SectionName::Fluid => self.fluid.as_ref().map(to_map),
            SectionName::InitialConditions => self.initial_conditions.as_ref().map(to_map),
            SectionName::BoundaryConditions => self.boundary_conditions.as_ref().map(to_map),
            SectionName::Wells => self.wells.as_ref().map(to_map),
            SectionName::Schedule => self.schedule.as_ref().map(to_map),
            SectionName::Execution => self.execution.as_ref().map(to_map),
            SectionName::SimNums => self.sim_nums.as_ref().map(to_map),
        };
        map.transpose()
    }

    /// Replaces a whole section from its JSON object form.
    pub fn replace_section(&mut self, name: SectionName, map: Map<String, Value>) -> serde_json::Result<()> {
        let value = Value::Object(map);
        match name {
            SectionName::Paths => self.paths = Some(serde_json::from_value(value)?),
            SectionName::PreProcessing => self.pre_processing = Some(serde_json::from_value(value)?),
            SectionName::Grid => self.grid = Some(serde_json::from_value(value)?),
            SectionName::Fluid => self.fluid = Some(serde_json::from_value(value)?),
            SectionName::InitialConditions => {
                self.initial_conditions = Some(serde_json::from_value(value)?)
            }
            SectionName::BoundaryConditions => {
                self.boundary_conditions = Some(serde_json::from_value(value)?)
            }
            SectionName::Wells => self.wells = Some(serde_json::from_value(value)?),
            SectionName::Schedule => self.schedule = Some(serde_json::from_value(value)?),
            SectionName::Execution => self.execution = Some(serde_json::from_value(value)?),
            SectionName::SimNums => self.sim_nums = Some(serde_json::from_value(value)?),
        }
        Ok(())
    }

    /// All present sections, in declaration order.
    pub fn sections(&self) -> serde_json::Result<Vec<(SectionName, Map<String, Value>)>> {
        let mut out = Vec::new();
        for name in SectionName::ALL {
            if let Some(map) = self.section_map(name)? {
                out.push((name, map));
            }
        }
        Ok(out)
    }

    pub fn sim_nums_mut(&mut self) -> &mut SimNumsSection {
        self.sim_nums.get_or_insert_with(SimNumsSection::default)
    }

    pub fn sequence_number(&self) -> u32 {
        self.sim_nums.as_ref().map(|s| s.sim_id).unwrap_or(0)
    }

    pub fn content_id(&self) -> Option<&ContentId> {
        self.sim_nums.as_ref().and_then(|s| s.content_id.as_ref())
    }

    pub fn case_name(&self) -> Option<&str> {
        self.pre_processing.as_ref().map(|p| p.case_name.as_str())
    }
}

/// Finds the stored key matching `requested`, ignoring ASCII case.
pub fn resolve_field(map: &Map<String, Value>, requested: &str) -> Option<String> {
    if map.contains_key(requested) {
        return Some(requested.to_string());
    }
    map.keys()
        .find(|k| k.eq_ignore_ascii_case(requested))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_names_sanitize_for_files_and_columns() {
        assert_eq!(SectionName::PreProcessing.file_stem(), "PreProcessing");
        assert_eq!(SectionName::InitialConditions.file_stem(), "InitialConditions");
        assert_eq!(SectionName::InitialConditions.column_prefix(), "initial_conditions");
        assert_eq!(SectionName::PreProcessing.column_prefix(), "pre_processing");
    }

    #[test]
    fn parse_accepts_display_and_stem_forms() {
        assert_eq!(SectionName::parse("Pre-Processing"), Some(SectionName::PreProcessing));
        assert_eq!(SectionName::parse("initial_conditions"), Some(SectionName::InitialConditions));
        assert_eq!(SectionName::parse("fluid"), Some(SectionName::Fluid));
        assert_eq!(SectionName::parse("Rock"), None);
    }

    #[test]
    fn fluid_section_round_trips_through_map_with_passthrough() {
        let mut set = ParameterSet::default();
        let fluid = FluidSection {
            pres_ref: 10.0,
            temp_ref: 40.0,
            cp_rock: 4.35e-5,
            srw: 0.27,
            src: 0.2,
            pe: 5.0,
            xnacl: 0.1,
            rho_h2o: 1000.0,
            extra: Passthrough::from([("mu_brine".to_string(), Value::from(0.8))]),
        };
        set.fluid = Some(fluid.clone());

        let map = set.section_map(SectionName::Fluid).unwrap().unwrap();
        assert!(map.contains_key("XNaCl"));
        assert_eq!(map["mu_brine"], Value::from(0.8));

        let mut edited = map.clone();
        edited.insert("pres_ref".into(), Value::from(12.5));
        set.replace_section(SectionName::Fluid, edited).unwrap();
        let back = set.fluid.as_ref().unwrap();
        assert_eq!(back.pres_ref, 12.5);
        assert_eq!(back.extra, fluid.extra);
    }

    #[test]
    fn resolve_field_is_case_insensitive() {
        let map = Map::from_iter([("XNaCl".to_string(), Value::from(0.1))]);
        assert_eq!(resolve_field(&map, "xnacl").as_deref(), Some("XNaCl"));
        assert_eq!(resolve_field(&map, "rho"), None);
    }

    #[test]
    fn missing_sections_lists_absent_ones() {
        let set = ParameterSet {
            sim_nums: Some(SimNumsSection::default()),
            ..Default::default()
        };
        let missing = set.missing_sections(&[SectionName::Paths, SectionName::SimNums]);
        assert_eq!(missing, vec![SectionName::Paths]);
    }
}

use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::cache::{DedupCache, combination_key, token};
use super::parameter::Parameter;
use super::types::{ParameterSet, SectionName, resolve_field};
use super::PlanError;

#[derive(Debug, Clone, Copy)]
pub struct VariationConfig {
    pub min_points: usize,
    pub max_points: usize,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            min_points: 2,
            max_points: 100,
        }
    }
}

/// One emitted variant of the base configuration.
#[derive(Debug, Clone)]
pub struct PlannedRun {
    pub sequence_number: u32,
    pub params: ParameterSet,
    /// Whole combination already recorded in the dedup cache.
    pub skippable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariationSummary {
    pub section: SectionName,
    pub fields: Vec<String>,
    pub delta: f64,
    pub points_per_field: usize,
    pub total_combinations: usize,
}

/// Builds the Cartesian product of sampled values for the selected fields.
pub struct SweepPlanner {
    base: ParameterSet,
    section: SectionName,
    parameters: Vec<Parameter>,
    delta: f64,
    points: usize,
    total: usize,
    cache: Option<DedupCache>,
}

pub fn points_for_delta(delta: f64, cfg: &VariationConfig) -> usize {
    if delta <= 0.0 {
        return 1;
    }
    let raw = (1.0 / delta).round();
    let raw = if raw.is_finite() { raw as usize } else { cfg.max_points };
    raw.clamp(cfg.min_points, cfg.max_points.max(cfg.min_points))
}

/// Size of the sweep, or `None` when it cannot be numbered with `u32`
/// sequence numbers.
pub fn combination_count(points: usize, fields: usize) -> Option<usize> {
    let total = match u32::try_from(fields) {
        Ok(0) => 1,
        Ok(exp) => points.checked_pow(exp)?,
        Err(_) => return None,
    };
    u32::try_from(total).ok().map(|_| total)
}

impl SweepPlanner {
    pub fn new<S: AsRef<str>>(
        base: ParameterSet,
        section: SectionName,
        fields: &[S],
        delta: f64,
        cfg: &VariationConfig,
    ) -> Result<Self, PlanError> {
        if !(0.0..=1.0).contains(&delta) {
            return Err(PlanError::InvalidDelta { delta });
        }
        let map = base
            .section_map(section)?
            .ok_or(PlanError::MissingSection { section })?;

        let mut parameters = Vec::with_capacity(fields.len());
        if delta > 0.0 {
            for requested in fields {
                let requested = requested.as_ref();
                let key = resolve_field(&map, requested).ok_or_else(|| PlanError::UnknownField {
                    section,
                    field: requested.to_string(),
                })?;
                let base_value = map[&key].as_f64().ok_or_else(|| PlanError::NonNumericField {
                    section: Some(section),
                    field: key.clone(),
                })?;
                parameters.push(Parameter::new(key, base_value, delta)?);
            }
        }

        let points = points_for_delta(delta, cfg);
        let total = combination_count(points, parameters.len()).ok_or(PlanError::TooManyCombinations {
            points,
            fields: parameters.len(),
        })?;

        Ok(Self {
            base,
            section,
            parameters,
            delta,
            points,
            total,
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: DedupCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn points_per_field(&self) -> usize {
        self.points
    }

    pub fn total_combinations(&self) -> usize {
        self.total
    }

    pub fn summary(&self) -> VariationSummary {
        VariationSummary {
            section: self.section,
            fields: self.parameters.iter().map(|p| p.name().to_string()).collect(),
            delta: self.delta,
            points_per_field: self.points,
            total_combinations: self.total_combinations(),
        }
    }

    /// Emits every combination, first declared field varying slowest.
    ///
    /// With no varying fields (or a zero delta) the base set is emitted alone.
    pub fn plan(&mut self) -> Result<Vec<PlannedRun>, PlanError> {
        if self.parameters.is_empty() {
            info!("no varying fields; emitting base parameters only");
            let mut params = self.base.clone();
            params.sim_nums_mut().sim_id = 1;
            return Ok(vec![PlannedRun {
                sequence_number: 1,
                params,
                skippable: false,
            }]);
        }

        let base_map = self
            .base
            .section_map(self.section)?
            .ok_or(PlanError::MissingSection { section: self.section })?;
        let samples: Vec<Vec<f64>> = self.parameters.iter().map(|p| p.sample(self.points)).collect();

        let mut runs = Vec::with_capacity(self.total_combinations());
        for (idx, combo) in samples
            .iter()
            .map(|s| s.iter().copied())
            .multi_cartesian_product()
            .enumerate()
        {
            let mut map = base_map.clone();
            let mut tokens = Vec::with_capacity(combo.len());
            for (param, value) in self.parameters.iter().zip(&combo) {
                map.insert(param.name().to_string(), Value::from(*value));
                tokens.push(token(param.name(), *value));
            }

            let mut params = self.base.clone();
            params.replace_section(self.section, map)?;
            let sequence_number = idx as u32 + 1;
            params.sim_nums_mut().sim_id = sequence_number;

            let key = combination_key(&tokens);
            let skippable = match self.cache.as_mut() {
                Some(cache) => !cache.record(key),
                None => false,
            };
            if skippable {
                debug!(sequence_number, "combination already in dedup cache");
            }

            runs.push(PlannedRun {
                sequence_number,
                params,
                skippable,
            });
        }

        if let Some(cache) = self.cache.as_mut() {
            cache.flush()?;
        }
        info!(
            section = %self.section,
            points = self.points,
            combinations = runs.len(),
            "planned parameter sweep"
        );
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::test_support::base_parameters;

    #[test]
    fn points_follow_rounded_inverse_delta() {
        let cfg = VariationConfig::default();
        assert_eq!(points_for_delta(0.5, &cfg), 2);
        assert_eq!(points_for_delta(0.3, &cfg), 3);
        assert_eq!(points_for_delta(0.9, &cfg), 2);
        assert_eq!(points_for_delta(0.001, &cfg), 100);
    }

    #[test]
    fn single_field_scenario() {
        let mut planner =
            SweepPlanner::new(base_parameters(), SectionName::Fluid, &["pres_ref"], 0.5, &VariationConfig::default())
                .unwrap();
        let runs = planner.plan().unwrap();
        assert_eq!(runs.len(), 2);
        let values: Vec<f64> = runs.iter().map(|r| r.params.fluid.as_ref().unwrap().pres_ref).collect();
        assert_eq!(values, vec![5.0, 15.0]);
        let seqs: Vec<u32> = runs.iter().map(|r| r.params.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn product_enumerates_first_field_slowest() {
        let mut planner = SweepPlanner::new(
            base_parameters(),
            SectionName::Fluid,
            &["pres_ref", "srw"],
            0.5,
            &VariationConfig::default(),
        )
        .unwrap();
        let runs = planner.plan().unwrap();
        assert_eq!(runs.len(), 4);
        let pairs: Vec<(f64, f64)> = runs
            .iter()
            .map(|r| {
                let f = r.params.fluid.as_ref().unwrap();
                (f.pres_ref, f.srw)
            })
            .collect();
        assert_eq!(pairs[0].0, pairs[1].0);
        assert_ne!(pairs[0].1, pairs[1].1);
        assert!(pairs[2].0 > pairs[0].0);
    }

    #[test]
    fn unknown_field_and_missing_section_fail() {
        let err = SweepPlanner::new(base_parameters(), SectionName::Fluid, &["porosity"], 0.5, &VariationConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, PlanError::UnknownField { .. }));

        let mut base = base_parameters();
        base.wells = None;
        let err = SweepPlanner::new(base, SectionName::Wells, &["co2_inj"], 0.5, &VariationConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, PlanError::MissingSection { .. }));
    }

    #[test]
    fn combination_count_refuses_overflow() {
        assert_eq!(combination_count(3, 2), Some(9));
        assert_eq!(combination_count(100, 0), Some(1));
        assert_eq!(combination_count(100, 10), None);
        assert_eq!(combination_count(usize::MAX, 2), None);
        assert_eq!(combination_count(2, 32), None);
        assert_eq!(combination_count(2, 31), Some(1 << 31));
    }

    #[test]
    fn oversized_sweep_is_rejected_up_front() {
        let fields = ["pres_ref", "temp_ref", "srw", "rho_h2o", "xnacl"];
        let cfg = VariationConfig {
            min_points: 100,
            max_points: 100,
        };
        let err = SweepPlanner::new(base_parameters(), SectionName::Fluid, &fields, 0.5, &cfg)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PlanError::TooManyCombinations { points: 100, fields: 5 }
        ));
    }

    #[test]
    fn zero_delta_emits_base_only() {
        let mut planner =
            SweepPlanner::new(base_parameters(), SectionName::Fluid, &["pres_ref"], 0.0, &VariationConfig::default())
                .unwrap();
        let runs = planner.plan().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].params.fluid, base_parameters().fluid);
        assert_eq!(runs[0].sequence_number, 1);
    }

    #[test]
    fn cache_flags_only_whole_repeated_combinations() {
        let cfg = VariationConfig::default();
        let mut cache = DedupCache::in_memory();
        // shares the pres_ref token with the sweep but not the full combination
        cache.record(combination_key(&[token("pres_ref", 5.0)]));
        cache.record(combination_key(&[token("pres_ref", 15.0), token("srw", 0.135)]));

        let mut planner = SweepPlanner::new(base_parameters(), SectionName::Fluid, &["pres_ref", "srw"], 0.5, &cfg)
            .unwrap()
            .with_cache(cache);
        let runs = planner.plan().unwrap();
        let flagged: Vec<u32> = runs.iter().filter(|r| r.skippable).map(|r| r.sequence_number).collect();
        assert_eq!(flagged, vec![3]);
    }
}

//! One batch through the data lake: stage, solve, parse, consolidate, record.
//!
//! Stages run strictly in order. A failure confined to one run marks that
//! run FAILED and the batch moves on. A solver failure, an upload failure or
//! any other batch-level error stops the batch, and every run it left RUNNING
//! is marked FAILED. An intermediate layer is purged only after the stage
//! consuming it finished, and only when that stage had no per-run failures.

use ahash::AHashSet;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::layers::{DataLake, Layer};
use crate::config::PipelineConfig;
use crate::consolidate::{GoldenWriter, LocalObjectStore, Quantity, consolidate};
use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{MetadataRecorder, RunMetadata, write_long_format};
use crate::params::{DedupCache, ParameterSet, PlannedRun, SectionName, SweepPlanner};
use crate::results::{GridShape, ResultsParser, read_silver, write_silver};
use crate::runtime;
use crate::solver::{ProcessSolver, SolverBatch, SolverRunner};
use crate::staging::{ContentId, InputStager, StageError, canonical_json, content_id};
use crate::status::{RunStatus, StatusStore};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub hash_section: SectionName,
    pub layers_to_keep: BTreeSet<Layer>,
    pub clean_older_files: bool,
    pub concurrency: usize,
    pub max_tensor_bytes: Option<u64>,
    pub long_format_quantity: Option<Quantity>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            hash_section: SectionName::Fluid,
            layers_to_keep: BTreeSet::new(),
            clean_older_files: false,
            concurrency: 1,
            max_tensor_bytes: None,
            long_format_quantity: Some(Quantity::GasSaturation),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Combination already present in the dedup cache.
    Cached,
    AlreadyCompleted,
    PreviouslyFailed,
    /// A RUNNING record left behind by an interrupted batch.
    InProgress,
    DuplicateInBatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRun {
    pub sequence_number: u32,
    pub content_id: Option<ContentId>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct FailedRun {
    pub content_id: ContentId,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub planned: usize,
    pub skipped: Vec<SkippedRun>,
    pub completed: Vec<ContentId>,
    pub failed: Vec<FailedRun>,
    pub metadata_file: Option<PathBuf>,
    pub long_format_file: Option<PathBuf>,
}

impl BatchReport {
    fn skip(&mut self, sequence_number: u32, content_id: Option<ContentId>, reason: SkipReason) {
        debug!(sequence_number, ?reason, "skipping run");
        self.skipped.push(SkippedRun {
            sequence_number,
            content_id,
            reason,
        });
    }
}

struct ActiveRun {
    id: ContentId,
    case: String,
    params: ParameterSet,
}

struct FinishedRun {
    run: ActiveRun,
    dimensions: GridShape,
    timesteps: usize,
}

/// Message of `err` followed by each of its sources.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

fn fail_run(status: &StatusStore, report: &mut BatchReport, id: &ContentId, err: Error) -> Result<()> {
    let message = error_chain(&err);
    error!(content_id = %id, kind = ?err.kind(), error = %message, "run failed");
    status.update_status(id, RunStatus::Failed)?;
    report.failed.push(FailedRun {
        content_id: id.clone(),
        kind: err.kind(),
        message,
    });
    Ok(())
}

fn progress(len: usize, what: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template(&format!("[{{elapsed_precise}}] {{bar:40}} {{pos}}/{{len}} {what} {{msg}}")) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Plans the configured sweep over `base`.
pub fn plan_sweep(cfg: &PipelineConfig, base: ParameterSet) -> Result<Vec<PlannedRun>> {
    let section = cfg.sweep_section()?;
    let mut planner = SweepPlanner::new(base, section, &cfg.sweep.fields, cfg.sweep.delta, &cfg.variation())?;
    if let Some(path) = &cfg.sweep.dedup_cache {
        planner = planner.with_cache(DedupCache::open(path)?);
    }
    let summary = planner.summary();
    info!(
        section = %summary.section,
        fields = ?summary.fields,
        delta = summary.delta,
        points_per_field = summary.points_per_field,
        total = summary.total_combinations,
        "variation summary"
    );
    Ok(planner.plan()?)
}

pub struct Pipeline {
    lake: DataLake,
    status: StatusStore,
    solver: Box<dyn SolverRunner>,
    golden: GoldenWriter,
    recorder: MetadataRecorder,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        lake_root: impl Into<PathBuf>,
        status: StatusStore,
        solver: Box<dyn SolverRunner>,
        golden: GoldenWriter,
        options: PipelineOptions,
    ) -> Self {
        Self {
            lake: DataLake::new(lake_root, options.layers_to_keep.clone()),
            status,
            solver,
            golden,
            recorder: MetadataRecorder::default(),
            options,
        }
    }

    /// Wires the external solver, status database and optional mirror from config.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let status = StatusStore::open(&cfg.pipeline.status_db)?;
        let solver = ProcessSolver::new(&cfg.solver.program)
            .args(cfg.solver.args.iter().cloned())
            .working_dir(cfg.solver.working_dir.clone())
            .deadline(cfg.solver_deadline());
        let mut golden = GoldenWriter::new(cfg.codec());
        if let Some(upload) = &cfg.upload {
            golden = golden.with_store(Box::new(LocalObjectStore::new(&upload.root)));
        }
        let options = PipelineOptions {
            hash_section: cfg.hash_section()?,
            layers_to_keep: cfg.layers_to_keep(),
            clean_older_files: cfg.pipeline.clean_older_files,
            concurrency: runtime::solver_concurrency(cfg.pipeline.num_threads).count,
            max_tensor_bytes: cfg.max_tensor_bytes(),
            long_format_quantity: cfg.pipeline.long_format_quantity,
        };
        Ok(Self::new(&cfg.pipeline.data_lake_root, status, Box::new(solver), golden, options))
    }

    pub fn lake(&self) -> &DataLake {
        &self.lake
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn run_batch(&mut self, planned: Vec<PlannedRun>) -> Result<BatchReport> {
        let mut report = BatchReport {
            planned: planned.len(),
            ..BatchReport::default()
        };
        if self.options.clean_older_files {
            self.lake.clean_older_files()?;
        }
        self.lake.create()?;

        let staged = self.stage_all(planned, &mut report)?;
        if staged.is_empty() {
            info!(skipped = report.skipped.len(), failed = report.failed.len(), "nothing to solve");
            return Ok(report);
        }
        self.lake.stage_completed(Layer::Staging, true)?;

        let ids: Vec<ContentId> = staged.iter().map(|r| r.id.clone()).collect();
        if let Err(err) = self.process(staged, &mut report) {
            self.fail_stranded(&ids);
            return Err(err);
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "batch finished"
        );
        Ok(report)
    }

    fn process(&mut self, staged: Vec<ActiveRun>, report: &mut BatchReport) -> Result<()> {
        self.solve(&staged)?;
        self.lake.stage_completed(Layer::Bronze, true)?;

        let failures = report.failed.len();
        let parsed = self.parse_all(staged, report)?;
        self.lake.stage_completed(Layer::Silver, report.failed.len() == failures)?;

        let failures = report.failed.len();
        let finished = self.consolidate_all(parsed, report)?;
        self.lake.stage_completed(Layer::Golden, report.failed.len() == failures)?;

        if !finished.is_empty() {
            self.write_tabular(&finished, report)?;
        }
        self.lake.stage_completed(Layer::Tabular, true)?;
        Ok(())
    }

    /// Marks every run of the batch still RUNNING as FAILED.
    fn fail_stranded(&self, ids: &[ContentId]) {
        let mut stranded = 0usize;
        for id in ids {
            let outcome = match self.status.get(id) {
                Ok(Some(record)) if record.status == RunStatus::Running => {
                    stranded += 1;
                    self.status.update_status(id, RunStatus::Failed)
                }
                Ok(_) => Ok(()),
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                warn!(content_id = %id, error = %err, "could not mark run failed");
            }
        }
        if stranded > 0 {
            error!(runs = stranded, "batch stopped; marked remaining runs failed");
        }
    }

    fn stage_all(&mut self, planned: Vec<PlannedRun>, report: &mut BatchReport) -> Result<Vec<ActiveRun>> {
        let stager = InputStager::new(self.lake.path(Layer::Staging));
        let hash_section = self.options.hash_section;
        let mut seen = AHashSet::new();
        let mut staged = Vec::with_capacity(planned.len());

        let pb = progress(planned.len(), "staged");
        for run in planned {
            pb.inc(1);
            let seq = run.sequence_number;
            if run.skippable {
                report.skip(seq, None, SkipReason::Cached);
                continue;
            }
            let mut params = run.params;
            let section = params
                .section_map(hash_section)
                .map_err(StageError::from)?
                .ok_or(StageError::MissingSections {
                    sections: vec![hash_section],
                })?;
            let id = content_id(&section);
            if !seen.insert(id.clone()) {
                report.skip(seq, Some(id), SkipReason::DuplicateInBatch);
                continue;
            }
            let params_repr = canonical_json(&Value::Object(section));

            match self.status.get(&id)? {
                None => {
                    self.status.insert(&id, seq, &params_repr)?;
                }
                Some(record) => match record.status {
                    RunStatus::Completed => {
                        info!(content_id = %id, "already completed");
                        report.skip(seq, Some(id), SkipReason::AlreadyCompleted);
                        continue;
                    }
                    RunStatus::Failed => {
                        info!(content_id = %id, "previously failed");
                        report.skip(seq, Some(id), SkipReason::PreviouslyFailed);
                        continue;
                    }
                    RunStatus::Running => {
                        warn!(content_id = %id, "record left RUNNING by an earlier batch");
                        report.skip(seq, Some(id), SkipReason::InProgress);
                        continue;
                    }
                    RunStatus::Created => debug!(content_id = %id, "reusing created record"),
                },
            }

            let sim = params.sim_nums_mut();
            sim.content_id = Some(id.clone());
            sim.staging_folder = Some(id.to_string());
            let case = params.case_name().unwrap_or_default().to_string();
            match stager.stage(&params) {
                Ok(_) => staged.push(ActiveRun { id, case, params }),
                Err(err) => fail_run(&self.status, report, &id, err.into())?,
            }
        }
        pb.finish_and_clear();
        info!(staged = staged.len(), "staging finished");
        Ok(staged)
    }

    fn solve(&mut self, staged: &[ActiveRun]) -> Result<()> {
        let ids: Vec<ContentId> = staged.iter().map(|r| r.id.clone()).collect();
        for id in &ids {
            self.status.update_status(id, RunStatus::Running)?;
        }
        let staging_dir = self.lake.path(Layer::Staging);
        let results_dir = self.lake.path(Layer::Bronze);
        let batch = SolverBatch {
            staging_dir: &staging_dir,
            results_dir: &results_dir,
            concurrency: self.options.concurrency,
            runs: &ids,
        };
        if let Err(err) = self.solver.run_batch(&batch) {
            error!(runs = ids.len(), error = %error_chain(&err), "solver failed; failing whole batch");
            return Err(err.into());
        }
        Ok(())
    }

    fn parse_all(&mut self, staged: Vec<ActiveRun>, report: &mut BatchReport) -> Result<Vec<ActiveRun>> {
        let parser = ResultsParser::new(self.lake.path(Layer::Bronze));
        let silver = self.lake.path(Layer::Silver);
        let mut parsed = Vec::with_capacity(staged.len());

        let pb = progress(staged.len(), "parsed");
        for run in staged {
            pb.inc(1);
            let outcome = parser
                .parse(&run.case, &run.id)
                .and_then(|states| write_silver(&silver, &states));
            match outcome {
                Ok(path) => {
                    debug!(content_id = %run.id, path = %path.display(), "wrote silver");
                    parsed.push(run);
                }
                Err(err) => fail_run(&self.status, report, &run.id, err.into())?,
            }
        }
        pb.finish_and_clear();
        Ok(parsed)
    }

    fn finish_run(&self, run: &ActiveRun, silver: &Path, golden: &Path) -> Result<(GridShape, usize)> {
        let states = read_silver(silver, &run.case, &run.id)?;
        let tensors = consolidate(&states.states, self.options.max_tensor_bytes)?;
        self.golden.write(golden, &run.id, &tensors)?;
        let dimensions = states.dimensions().unwrap_or_default();
        Ok((dimensions, tensors.timesteps()))
    }

    fn consolidate_all(&mut self, parsed: Vec<ActiveRun>, report: &mut BatchReport) -> Result<Vec<FinishedRun>> {
        let silver = self.lake.path(Layer::Silver);
        let golden = self.lake.path(Layer::Golden);
        let mut finished = Vec::with_capacity(parsed.len());

        let pb = progress(parsed.len(), "consolidated");
        for run in parsed {
            pb.inc(1);
            match self.finish_run(&run, &silver, &golden) {
                Ok((dimensions, timesteps)) => {
                    self.status.update_status(&run.id, RunStatus::Completed)?;
                    report.completed.push(run.id.clone());
                    finished.push(FinishedRun {
                        run,
                        dimensions,
                        timesteps,
                    });
                }
                Err(err) if err.kind() == ErrorKind::Upload => {
                    pb.abandon();
                    error!(content_id = %run.id, error = %error_chain(&err), "upload failed; stopping batch");
                    return Err(err);
                }
                Err(err) => fail_run(&self.status, report, &run.id, err)?,
            }
        }
        pb.finish_and_clear();
        Ok(finished)
    }

    fn write_tabular(&mut self, finished: &[FinishedRun], report: &mut BatchReport) -> Result<()> {
        let tabular = self.lake.path(Layer::Tabular);
        let runs: Vec<RunMetadata<'_>> = finished
            .iter()
            .map(|f| RunMetadata {
                params: &f.run.params,
                dimensions: f.dimensions,
                timesteps: f.timesteps,
            })
            .collect();
        report.metadata_file = Some(self.recorder.record(&tabular, &runs)?);

        if let Some(quantity) = self.options.long_format_quantity {
            let golden = self.lake.path(Layer::Golden);
            let mut tensors = Vec::with_capacity(finished.len());
            for f in finished {
                tensors.push((f.run.id.clone(), self.golden.read(&golden, quantity, &f.run.id)?));
            }
            report.long_format_file = Some(write_long_format(&tabular, quantity, &tensors)?);
        }
        Ok(())
    }
}

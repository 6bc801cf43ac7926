use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use co2sweep::ErrorKind;
use co2sweep::consolidate::{Codec, GoldenWriter, MemoryObjectStore, Quantity};
use co2sweep::lake::{LakeEvent, Layer, Pipeline, PipelineOptions, SkipReason};
use co2sweep::params::{PlannedRun, SectionName, SweepPlanner, VariationConfig};
use co2sweep::results::{grid_file_names, mask_file_name, states_file_name};
use co2sweep::solver::{SolverBatch, SolverError, SolverRunner};
use co2sweep::staging::ContentId;
use co2sweep::status::{RunStatus, StatusStore};
use serde_json::json;

mod common;
use common::base;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behaviour {
    Succeed,
    Crash,
    /// First run's second timestep has too few pressure values.
    ShortFirstRun,
}

#[derive(Debug)]
struct FakeState {
    behaviour: Behaviour,
    batches: Vec<Vec<ContentId>>,
    staged_when_solving: Vec<bool>,
}

/// Writes a (2, 2, 1) grid with cells 0 and 2 active, two timesteps per run.
struct FakeSolver {
    state: Rc<RefCell<FakeState>>,
}

fn write_json(dir: &Path, name: &str, value: serde_json::Value) {
    fs::write(dir.join(name), value.to_string()).unwrap();
}

impl SolverRunner for FakeSolver {
    fn run_batch(&mut self, batch: &SolverBatch<'_>) -> Result<(), SolverError> {
        let mut state = self.state.borrow_mut();
        state.batches.push(batch.runs.to_vec());
        let staged = batch.runs.iter().all(|id| batch.staging_dir.join(id.as_str()).is_dir());
        state.staged_when_solving.push(staged);
        if state.behaviour == Behaviour::Crash {
            return Err(SolverError::NonZeroExit {
                program: "fake".into(),
                code: Some(3),
            });
        }
        for (n, id) in batch.runs.iter().enumerate() {
            let dir = batch.results_dir;
            write_json(dir, &grid_file_names("GCS01", id)[0], json!([2, 2, 1]));
            write_json(dir, &mask_file_name("GCS01", id), json!([1, 0, 1, 0]));
            let p = 100.0 * (n + 1) as f64;
            let mut states = json!([
                {"pressure": [p, p + 100.0], "s": [[0.1, 0.9], [0.2, 0.8]]},
                {"pressure": [p + 1.0, p + 101.0], "s": [[0.3, 0.7], [0.4, 0.6]]},
            ]);
            if n == 0 && state.behaviour == Behaviour::ShortFirstRun {
                states[1]["pressure"] = json!([p]);
            }
            write_json(dir, &states_file_name("GCS01", id), states);
        }
        Ok(())
    }
}

/// pres_ref at 5 and 15.
fn planned() -> Vec<PlannedRun> {
    SweepPlanner::new(base(), SectionName::Fluid, &["pres_ref"], 0.5, &VariationConfig::default())
        .unwrap()
        .plan()
        .unwrap()
}

fn pipeline(
    root: &Path,
    behaviour: Behaviour,
    options: PipelineOptions,
    golden: GoldenWriter,
) -> (Pipeline, Rc<RefCell<FakeState>>) {
    let state = Rc::new(RefCell::new(FakeState {
        behaviour,
        batches: Vec::new(),
        staged_when_solving: Vec::new(),
    }));
    let solver = FakeSolver { state: state.clone() };
    let pipe = Pipeline::new(root, StatusStore::in_memory().unwrap(), Box::new(solver), golden, options);
    (pipe, state)
}

fn keep(layers: &[Layer]) -> PipelineOptions {
    PipelineOptions {
        layers_to_keep: layers.iter().copied().collect::<BTreeSet<_>>(),
        ..PipelineOptions::default()
    }
}

fn is_empty(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}

/// Every purge must come after the stage that consumes the purged layer.
fn assert_purges_follow_consumers(events: &[LakeEvent]) {
    for (pos, event) in events.iter().enumerate() {
        if let LakeEvent::Purged(layer) = event {
            let consumer = Layer::ORDER
                .into_iter()
                .find(|l| l.input() == Some(*layer))
                .unwrap();
            assert!(
                events[..pos].contains(&LakeEvent::StageCompleted(consumer)),
                "{layer} purged before {consumer} completed: {events:?}"
            );
        }
    }
}

#[test]
fn full_batch_reaches_golden_and_tabular() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipe, state) = pipeline(
        tmp.path(),
        Behaviour::Succeed,
        keep(&[Layer::Golden]),
        GoldenWriter::new(Codec::DenseBlob),
    );

    let report = pipe.run_batch(planned()).unwrap();
    assert_eq!(report.planned, 2);
    assert_eq!(report.completed.len(), 2);
    assert!(report.failed.is_empty());
    assert_ne!(report.completed[0], report.completed[1]);
    assert_eq!(state.borrow().batches.len(), 1);
    assert_eq!(state.borrow().staged_when_solving, vec![true]);

    for id in &report.completed {
        let record = pipe.status().get(id).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        let stored = pipe.status().params_for(id).unwrap().unwrap();
        assert!(stored.contains_key("pres_ref"));
    }

    let golden = pipe.lake().path(Layer::Golden);
    let first = GoldenWriter::new(Codec::DenseBlob)
        .read(&golden, Quantity::Pressure, &report.completed[0])
        .unwrap();
    assert_eq!(first.dim(), (2, 2, 1, 2));
    assert_eq!(first[[0, 0, 0, 0]], 100.0);
    assert_eq!(first[[0, 1, 0, 0]], 200.0);
    assert_eq!(first[[0, 1, 0, 1]], 201.0);
    assert!(first[[1, 0, 0, 0]].is_nan());
    assert!(first[[1, 1, 0, 1]].is_nan());

    let gas = GoldenWriter::new(Codec::DenseBlob)
        .read(&golden, Quantity::GasSaturation, &report.completed[0])
        .unwrap();
    assert_eq!(gas[[0, 0, 0, 1]], 0.7);

    assert!(report.metadata_file.as_ref().unwrap().is_file());
    assert!(report.long_format_file.as_ref().unwrap().ends_with("gas_saturation_long.parquet"));

    for layer in [Layer::Staging, Layer::Bronze, Layer::Silver] {
        assert!(is_empty(&pipe.lake().path(layer)), "{layer} should be purged");
    }
    assert!(!is_empty(&golden));
    assert_purges_follow_consumers(pipe.lake().events());
}

#[test]
fn kept_layers_are_never_purged() {
    let tmp = tempfile::tempdir().unwrap();
    let all = [Layer::Staging, Layer::Bronze, Layer::Silver, Layer::Golden];
    let (mut pipe, _) = pipeline(tmp.path(), Behaviour::Succeed, keep(&all), GoldenWriter::new(Codec::DenseBlob));

    let report = pipe.run_batch(planned()).unwrap();
    assert_eq!(report.completed.len(), 2);
    for layer in all {
        assert!(!is_empty(&pipe.lake().path(layer)), "{layer} should be kept");
    }
    assert!(!pipe.lake().events().iter().any(|e| matches!(e, LakeEvent::Purged(_))));
}

#[test]
fn completed_runs_are_not_solved_again() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipe, state) = pipeline(tmp.path(), Behaviour::Succeed, keep(&[]), GoldenWriter::new(Codec::DenseBlob));

    pipe.run_batch(planned()).unwrap();
    let again = pipe.run_batch(planned()).unwrap();
    assert!(again.completed.is_empty());
    assert_eq!(again.skipped.len(), 2);
    assert!(again.skipped.iter().all(|s| s.reason == SkipReason::AlreadyCompleted));
    assert_eq!(state.borrow().batches.len(), 1);
}

#[test]
fn cached_combinations_never_reach_the_solver() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipe, state) = pipeline(tmp.path(), Behaviour::Succeed, keep(&[]), GoldenWriter::new(Codec::DenseBlob));
    let runs: Vec<PlannedRun> = planned()
        .into_iter()
        .map(|mut r| {
            r.skippable = true;
            r
        })
        .collect();

    let report = pipe.run_batch(runs).unwrap();
    assert!(report.skipped.iter().all(|s| s.reason == SkipReason::Cached));
    assert!(state.borrow().batches.is_empty());
}

#[test]
fn solver_failure_fails_the_whole_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipe, state) = pipeline(tmp.path(), Behaviour::Crash, keep(&[]), GoldenWriter::new(Codec::DenseBlob));

    let err = pipe.run_batch(planned()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SolverExecution);

    let records = pipe.status().list().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == RunStatus::Failed));
    assert!(!is_empty(&pipe.lake().path(Layer::Staging)));
    assert!(!pipe.lake().events().contains(&LakeEvent::Purged(Layer::Staging)));

    let skipped = pipe.run_batch(planned()).unwrap();
    assert!(skipped.skipped.iter().all(|s| s.reason == SkipReason::PreviouslyFailed));
    assert_eq!(state.borrow().batches.len(), 1);
}

#[test]
fn failed_runs_stay_failed_after_the_solver_recovers() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipe, state) = pipeline(tmp.path(), Behaviour::Crash, keep(&[]), GoldenWriter::new(Codec::DenseBlob));

    assert!(pipe.run_batch(planned()).is_err());
    let before = pipe.status().list().unwrap();

    state.borrow_mut().behaviour = Behaviour::Succeed;
    let report = pipe.run_batch(planned()).unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(report.skipped.iter().all(|s| s.reason == SkipReason::PreviouslyFailed));
    assert_eq!(state.borrow().batches.len(), 1);

    let after = pipe.status().list().unwrap();
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(new.status, RunStatus::Failed);
        assert_eq!(old.content_id, new.content_id);
        assert_eq!(old.sequence_number, new.sequence_number);
        assert_eq!(old.created_at, new.created_at);
    }
}

#[test]
fn inconsistent_results_fail_only_that_run() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipe, _) = pipeline(
        tmp.path(),
        Behaviour::ShortFirstRun,
        keep(&[]),
        GoldenWriter::new(Codec::ChunkedStore { chunk_timesteps: 1 }),
    );

    let report = pipe.run_batch(planned()).unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.completed.len(), 1);
    let failed = &report.failed[0];
    assert_eq!(failed.kind, ErrorKind::DataConsistency);
    assert_eq!(
        pipe.status().get(&failed.content_id).unwrap().unwrap().status,
        RunStatus::Failed
    );
    assert_eq!(
        pipe.status().get(&report.completed[0]).unwrap().unwrap().status,
        RunStatus::Completed
    );

    // bronze stays for inspection because parsing had a failure
    assert!(!is_empty(&pipe.lake().path(Layer::Bronze)));
    assert!(!pipe.lake().events().contains(&LakeEvent::Purged(Layer::Bronze)));
    assert_purges_follow_consumers(pipe.lake().events());
}

#[test]
fn artifacts_are_mirrored_to_the_object_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryObjectStore::new();
    let golden = GoldenWriter::new(Codec::DenseBlob).with_store(Box::new(store.clone()));
    let (mut pipe, _) = pipeline(tmp.path(), Behaviour::Succeed, keep(&[]), golden);

    let report = pipe.run_batch(planned()).unwrap();
    let keys = store.keys();
    assert_eq!(keys.len(), 6);
    let id = &report.completed[0];
    assert!(keys.contains(&format!("consolidated/pressure/pressure_{id}.npy")));
}

#[test]
fn upload_failure_stops_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let golden = GoldenWriter::new(Codec::DenseBlob).with_store(Box::new(MemoryObjectStore::rejecting()));
    let (mut pipe, _) = pipeline(tmp.path(), Behaviour::Succeed, keep(&[]), golden);

    let err = pipe.run_batch(planned()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upload);
    let records = pipe.status().list().unwrap();
    assert!(records.iter().all(|r| r.status != RunStatus::Completed));
    assert!(!pipe.lake().events().contains(&LakeEvent::StageCompleted(Layer::Golden)));
}

#[test]
fn upload_failure_leaves_no_run_running() {
    let tmp = tempfile::tempdir().unwrap();
    let golden = GoldenWriter::new(Codec::DenseBlob).with_store(Box::new(MemoryObjectStore::rejecting()));
    let (mut pipe, _) = pipeline(tmp.path(), Behaviour::Succeed, keep(&[]), golden);

    assert!(pipe.run_batch(planned()).is_err());
    let records = pipe.status().list().unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.status, RunStatus::Failed, "{} left {}", record.content_id, record.status);
    }
}

#[test]
fn default_options_keep_golden_output() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipe, _) = pipeline(
        tmp.path(),
        Behaviour::Succeed,
        PipelineOptions::default(),
        GoldenWriter::new(Codec::DenseBlob),
    );

    let report = pipe.run_batch(planned()).unwrap();
    assert_eq!(report.completed.len(), 2);
    let golden = pipe.lake().path(Layer::Golden);
    for id in &report.completed {
        for quantity in Quantity::ALL {
            let tensor = golden.join(format!("{}_{id}.npy", quantity.as_str()));
            assert!(tensor.is_file(), "missing {}", tensor.display());
        }
    }
    assert!(!pipe.lake().events().contains(&LakeEvent::Purged(Layer::Golden)));
    assert!(report.metadata_file.as_ref().unwrap().is_file());
}

#[test]
fn every_keep_subset_purges_only_after_consumers() {
    let layers = [Layer::Staging, Layer::Bronze, Layer::Silver, Layer::Golden];
    for bits in 0u8..16 {
        let kept: Vec<Layer> = layers
            .iter()
            .enumerate()
            .filter(|(n, _)| bits & (1 << n) != 0)
            .map(|(_, l)| *l)
            .collect();
        let tmp = tempfile::tempdir().unwrap();
        let (mut pipe, _) = pipeline(tmp.path(), Behaviour::Succeed, keep(&kept), GoldenWriter::new(Codec::DenseBlob));

        let report = pipe.run_batch(planned()).unwrap();
        assert_eq!(report.completed.len(), 2, "keep {kept:?}");
        assert_purges_follow_consumers(pipe.lake().events());
        for layer in layers {
            let purged = pipe.lake().events().contains(&LakeEvent::Purged(layer));
            let expect_kept = kept.contains(&layer) || !layer.is_intermediate();
            assert_eq!(purged, !expect_kept, "keep {kept:?}, layer {layer}");
            assert_eq!(is_empty(&pipe.lake().path(layer)), !expect_kept, "keep {kept:?}, layer {layer}");
        }
    }
}

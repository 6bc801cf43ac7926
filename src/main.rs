use anyhow::{Context, Result, bail};
use std::env;
use std::path::PathBuf;

use co2sweep::config::{PipelineConfig, load_setup};
use co2sweep::lake::{DataLake, Pipeline, plan_sweep};
use co2sweep::runtime;
use co2sweep::staging::ContentId;
use co2sweep::status::{RunRecord, StatusStore};

enum RunMode {
    Run { pipeline: PathBuf, setup: PathBuf },
    Status { db: PathBuf, content_id: Option<ContentId> },
    Clean { pipeline: PathBuf },
}

fn usage() -> ! {
    eprintln!(
        "usage: co2sweep run <pipeline.toml> <setup.toml>\n       co2sweep status <status.sqlite> [content_id]\n       co2sweep clean <pipeline.toml>"
    );
    std::process::exit(1);
}

fn existing(path: String) -> Result<PathBuf> {
    let path = PathBuf::from(path);
    if !path.exists() {
        bail!("{:?} does not exist", path);
    }
    Ok(path)
}

fn parse_args() -> Result<RunMode> {
    let mut args = env::args().skip(1);
    let command = args.next().unwrap_or_else(|| usage());
    let mode = match command.as_str() {
        "run" => {
            let pipeline = existing(args.next().unwrap_or_else(|| usage()))?;
            let setup = existing(args.next().unwrap_or_else(|| usage()))?;
            RunMode::Run { pipeline, setup }
        }
        "status" => {
            let db = existing(args.next().unwrap_or_else(|| usage()))?;
            let content_id = match args.next() {
                Some(raw) => match ContentId::parse(&raw) {
                    Some(id) => Some(id),
                    None => bail!("{raw:?} is not a content id"),
                },
                None => None,
            };
            RunMode::Status { db, content_id }
        }
        "clean" => RunMode::Clean {
            pipeline: existing(args.next().unwrap_or_else(|| usage()))?,
        },
        _ => usage(),
    };
    if args.next().is_some() {
        usage();
    }
    Ok(mode)
}

fn print_record(record: &RunRecord) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        record.content_id, record.sequence_number, record.status, record.created_at, record.params_repr
    );
}

fn main() -> Result<()> {
    runtime::init_tracing();

    match parse_args()? {
        RunMode::Run { pipeline, setup } => {
            let cfg = PipelineConfig::load(&pipeline)
                .with_context(|| format!("load pipeline config {}", pipeline.display()))?;
            let base = load_setup(&setup).with_context(|| format!("load setup {}", setup.display()))?;
            let planned = plan_sweep(&cfg, base).context("plan parameter sweep")?;
            let mut runner = Pipeline::from_config(&cfg).context("prepare pipeline")?;
            let report = runner.run_batch(planned).context("run batch")?;

            eprintln!(
                "[run] planned={} completed={} failed={} skipped={}",
                report.planned,
                report.completed.len(),
                report.failed.len(),
                report.skipped.len()
            );
            for failed in &report.failed {
                eprintln!("[run] {} failed ({:?}): {}", failed.content_id, failed.kind, failed.message);
            }
            if let Some(path) = &report.metadata_file {
                eprintln!("[run] metadata written to {}", path.display());
            }
            if !report.failed.is_empty() {
                bail!("{} run(s) failed", report.failed.len());
            }
        }
        RunMode::Status { db, content_id } => {
            let store = StatusStore::open(&db).with_context(|| format!("open status store {}", db.display()))?;
            match content_id {
                Some(id) => match store.get(&id)? {
                    Some(record) => print_record(&record),
                    None => bail!("no run recorded for {id}"),
                },
                None => {
                    for record in store.list()? {
                        print_record(&record);
                    }
                }
            }
        }
        RunMode::Clean { pipeline } => {
            let cfg = PipelineConfig::load(&pipeline)
                .with_context(|| format!("load pipeline config {}", pipeline.display()))?;
            let mut lake = DataLake::new(&cfg.pipeline.data_lake_root, cfg.layers_to_keep());
            lake.clean_older_files()
                .with_context(|| format!("clean data lake {}", cfg.pipeline.data_lake_root.display()))?;
            eprintln!("[clean] emptied {}", lake.root().display());
        }
    }
    Ok(())
}

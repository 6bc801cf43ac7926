//! Boundary to the external numerical solver.
//!
//! The solver is launched once per batch and blocks the pipeline until it
//! exits. Without a deadline a hung solver blocks forever; with one, the
//! child is killed and the batch reported as failed.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::staging::ContentId;

pub const STAGING_DIR_ENV: &str = "SWEEP_STAGING_DIR";
pub const RESULTS_DIR_ENV: &str = "SWEEP_RESULTS_DIR";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("cannot launch solver {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of solver process")]
    Wait(#[source] std::io::Error),

    #[error("solver {program:?} exited with {}", describe_exit(.code))]
    NonZeroExit { program: String, code: Option<i32> },

    #[error("solver exceeded its deadline of {limit:?} and was killed")]
    DeadlineExceeded { limit: Duration },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

/// What a single batch invocation sees.
#[derive(Debug, Clone)]
pub struct SolverBatch<'a> {
    pub staging_dir: &'a Path,
    pub results_dir: &'a Path,
    pub concurrency: usize,
    pub runs: &'a [ContentId],
}

pub trait SolverRunner {
    /// Runs the whole batch to completion.
    fn run_batch(&mut self, batch: &SolverBatch<'_>) -> Result<(), SolverError>;
}

#[derive(Debug, Clone)]
pub struct ProcessSolver {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    deadline: Option<Duration>,
}

impl ProcessSolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            deadline: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn deadline(mut self, limit: Option<Duration>) -> Self {
        self.deadline = limit;
        self
    }

    fn command(&self, batch: &SolverBatch<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(batch.concurrency.to_string())
            .env(STAGING_DIR_ENV, batch.staging_dir)
            .env(RESULTS_DIR_ENV, batch.results_dir);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn wait_with_deadline(&self, child: &mut Child, limit: Duration) -> Result<ExitStatus, SolverError> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(SolverError::Wait)? {
                return Ok(status);
            }
            if started.elapsed() >= limit {
                warn!(program = %self.program, ?limit, "solver deadline reached; killing");
                // the child may exit between try_wait and kill
                let _ = child.kill();
                child.wait().map_err(SolverError::Wait)?;
                return Err(SolverError::DeadlineExceeded { limit });
            }
            thread::sleep(POLL_INTERVAL.min(limit));
        }
    }
}

impl SolverRunner for ProcessSolver {
    fn run_batch(&mut self, batch: &SolverBatch<'_>) -> Result<(), SolverError> {
        info!(
            program = %self.program,
            runs = batch.runs.len(),
            concurrency = batch.concurrency,
            "launching solver"
        );
        let mut child = self.command(batch).spawn().map_err(|source| SolverError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let status = match self.deadline {
            Some(limit) => self.wait_with_deadline(&mut child, limit)?,
            None => {
                warn!("no solver deadline configured; a hung solver blocks the batch");
                child.wait().map_err(SolverError::Wait)?
            }
        };

        if !status.success() {
            return Err(SolverError::NonZeroExit {
                program: self.program.clone(),
                code: status.code(),
            });
        }
        info!(program = %self.program, "solver finished");
        Ok(())
    }
}

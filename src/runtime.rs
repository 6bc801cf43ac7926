use std::sync::Once;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// Env vars consulted for the solver's concurrency hint, in priority order.
pub const ENV_HINTS: [&str; 5] = [
    "SWEEP_SOLVER_THREADS",
    "SLURM_CPUS_PER_TASK",
    "SLURM_CPUS_ON_NODE",
    "PBS_NP",
    "OMP_NUM_THREADS",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyHint {
    pub count: usize,
    pub source: String,
}

fn parse_env_threads<F>(keys: &[&str], lookup: F) -> Option<ConcurrencyHint>
where
    F: Fn(&str) -> Option<String>,
{
    for &key in keys {
        if let Some(v) = lookup(key) {
            if let Ok(val) = v.trim().parse::<usize>() {
                if val > 0 {
                    return Some(ConcurrencyHint {
                        count: val,
                        source: key.to_string(),
                    });
                }
            }
        }
    }
    None
}

fn resolve_hint<F>(explicit: Option<usize>, lookup: F) -> ConcurrencyHint
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(count) = explicit.filter(|&n| n > 0) {
        return ConcurrencyHint {
            count,
            source: "pipeline.num_threads".to_string(),
        };
    }
    if let Some(hint) = parse_env_threads(&ENV_HINTS, lookup) {
        return hint;
    }
    let fallback = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);
    ConcurrencyHint {
        count: fallback,
        source: "available_parallelism".to_string(),
    }
}

/// Thread count handed to the solver: config first, then scheduler env vars.
pub fn solver_concurrency(explicit: Option<usize>) -> ConcurrencyHint {
    let hint = resolve_hint(explicit, |key| std::env::var(key).ok());
    info!(threads = hint.count, source = %hint.source, "solver concurrency");
    hint
}

/// Installs the stderr subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // a host application may already own the global subscriber
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

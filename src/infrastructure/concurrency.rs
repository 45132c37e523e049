/// Concurrency management for lift-causal.
/// Sizes the global rayon pool used by extraction, simulation and bootstrap.
use anyhow::{Context, Result};

/// Worker count leaving half the machine to other processes, minimum 1.
pub fn default_workers() -> usize {
    std::cmp::max(1, num_cpus::get() / 2)
}

/// Initialize the global rayon thread pool.
///
/// `workers` of `None` uses [`default_workers`]. Fails if the global pool was
/// already initialized.
pub fn init_thread_pool(workers: Option<usize>) -> Result<usize> {
    let cores = num_cpus::get();
    let workers = workers.unwrap_or_else(default_workers).max(1);

    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("lift-causal-{}", i))
        .build_global()
        .context("Failed to initialize the global thread pool")?;

    tracing::info!(workers, cores, "initialized thread pool");
    Ok(workers)
}

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Fixed set of worker threads shared by every unit.
/// Jobs start in the order they were submitted.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("worker-{i}"))
            // a panicking job loses only its own result:
            .panic_handler(|_| log::error!("job panicked on a worker thread"))
            .build()
            .context("building worker pool")?;
        log::debug!("started {} workers", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn size(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a job behind everything submitted before it.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.pool.spawn_fifo(job);
    }
}

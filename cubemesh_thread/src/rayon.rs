//! Utilities for multithreading with `rayon`.

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{num::NonZeroUsize, thread};

/// A bounded pool of worker threads for executing data-parallel passes.
#[derive(Debug)]
pub struct RayonThreadPool {
    pool: ThreadPool,
    num_threads: NonZeroUsize,
}

impl RayonThreadPool {
    /// Creates a new pool with the given number of worker threads.
    ///
    /// # Errors
    /// Returns an error if the operating system refuses to spawn the threads.
    pub fn new(num_threads: NonZeroUsize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads.get())
            .thread_name(|idx| format!("cubemesh-worker-{idx}"))
            .build()
            .context("Failed to build rayon thread pool")?;

        cubemesh_log::debug!("Created rayon thread pool with {num_threads} workers");

        Ok(Self { pool, num_threads })
    }

    /// Creates a new pool with the given number of worker threads, or with
    /// one thread per available CPU if `num_threads` is zero.
    ///
    /// # Errors
    /// See [`Self::new`].
    pub fn with_thread_count_or_available(num_threads: usize) -> Result<Self> {
        let num_threads = NonZeroUsize::new(num_threads).unwrap_or_else(|| {
            thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
        });
        Self::new(num_threads)
    }

    /// Returns a reference to the underlying [`ThreadPool`].
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Returns the number of worker threads in the pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.num_threads
    }

    /// Runs the given closure inside the pool, so that any parallel iterators
    /// it uses execute on the pool's worker threads. Blocks until the closure
    /// returns.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

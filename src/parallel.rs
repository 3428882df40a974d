//! Thread pool selection for training and batch search.

use std::sync::Arc;

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VocabTreeError};

/// How many worker threads the engines may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Everything runs on one worker thread.
    SingleThreaded,
    /// A pool of `num_threads` workers; 0 picks one per logical CPU.
    MultiThreaded { num_threads: usize },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::MultiThreaded { num_threads: 0 }
    }
}

impl ExecutionMode {
    /// Resolved worker count.
    pub fn num_threads(&self) -> usize {
        match *self {
            ExecutionMode::SingleThreaded => 1,
            ExecutionMode::MultiThreaded { num_threads: 0 } => num_cpus::get(),
            ExecutionMode::MultiThreaded { num_threads } => num_threads,
        }
    }
}

/// A dedicated rayon pool sized by an [`ExecutionMode`].
///
/// Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Executor {
    mode: ExecutionMode,
    thread_pool: Arc<ThreadPool>,
}

impl Executor {
    pub fn new(mode: ExecutionMode) -> Result<Self> {
        let num_threads = mode.num_threads();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("vocabtree-worker-{i}"))
            .build()
            .map_err(|e| VocabTreeError::thread_pool(e.to_string()))?;

        log::debug!("Created executor with {num_threads} worker threads");
        Ok(Executor {
            mode,
            thread_pool: Arc::new(thread_pool),
        })
    }

    /// Single-threaded executor.
    pub fn single_threaded() -> Result<Self> {
        Self::new(ExecutionMode::SingleThreaded)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Number of workers in the pool; also the shard count for per-thread caches.
    pub fn num_threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Run `op` inside the pool so that nested rayon iterators use its workers.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.thread_pool.install(op)
    }
}

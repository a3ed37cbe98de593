// ========================================================================================
//                       Worker pool sizing and the example partition
// ========================================================================================

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Environment variable that caps the number of prediction workers.
pub const MAX_THREADS_ENV: &str = "M3F_MAX_THREADS";

/// Number of consecutive examples handed to one worker at a time. Large enough to
/// amortize scheduling, small enough to balance uneven topic counts across workers.
pub const EXAMPLE_CHUNK_SIZE: usize = 4096;

/// Worker pool configuration. The pool is sized to the available hardware
/// parallelism, optionally capped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadConfig {
    pub max_threads: Option<usize>,
}

impl ThreadConfig {
    pub fn with_max_threads(max_threads: usize) -> Self {
        Self {
            max_threads: (max_threads > 0).then_some(max_threads),
        }
    }

    /// Reads the cap from `M3F_MAX_THREADS`. Unset, empty, zero, or unparsable
    /// values mean "no cap".
    pub fn from_env() -> Self {
        let max_threads = std::env::var(MAX_THREADS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|&n| n > 0);
        Self { max_threads }
    }

    pub fn num_threads(&self) -> usize {
        let available = num_cpus::get().max(1);
        match self.max_threads {
            Some(cap) => available.min(cap).max(1),
            None => available,
        }
    }

    pub fn build_pool(&self) -> Result<ThreadPool, ThreadPoolBuildError> {
        let num_threads = self.num_threads();
        log::debug!("Building prediction pool with {num_threads} worker(s)");
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("m3f-predict-{index}"))
            .build()
    }
}

/// Runs `kernel(e, &mut preds[e])` for every example, partitioning the output into
/// disjoint chunks of `EXAMPLE_CHUNK_SIZE`. Each worker owns its chunk outright, so
/// no two workers ever touch the same slot. Returns once every chunk is done.
#[inline]
pub fn par_for_each_example<F>(preds: &mut [f64], kernel: F)
where
    F: Fn(usize, &mut f64) + Sync + Send,
{
    preds
        .par_chunks_mut(EXAMPLE_CHUNK_SIZE)
        .enumerate()
        .for_each(|(chunk_index, chunk)| {
            let base = chunk_index * EXAMPLE_CHUNK_SIZE;
            for (offset, pred) in chunk.iter_mut().enumerate() {
                kernel(base + offset, pred);
            }
        });
}

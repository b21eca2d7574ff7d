//! Bounded fork-join worker pool.

use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{RegistrationError, Result};

/// Number of workers used for `items` units of work under `core_budget`.
pub fn thread_count(items: usize, core_budget: usize) -> usize {
    items.min(core_budget).max(1)
}

/// Cores available to this process, 1 when unknown.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A fixed-size pool that runs work in fork-join batches.
///
/// Items are processed in batches of at most [`WorkerPool::threads`]; every
/// worker of a batch finishes before the next batch starts, and the call
/// returns only after the last batch joins. Output `i` always belongs to input `i`.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Pool sized for `items` units of work: `min(items, core_budget)` threads.
    pub fn new(items: usize, core_budget: usize) -> Result<Self> {
        let threads = thread_count(items, core_budget);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("atlas-worker-{}", i))
            .build()
            .map_err(|e| RegistrationError::WorkerFailed {
                stage: "pool".to_string(),
                index: 0,
                reason: e.to_string(),
            })?;
        tracing::debug!(threads, items, core_budget, "Worker pool ready");
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `f(index, item)` for every item and collect results in input order.
    ///
    /// The first failure (by index) aborts the stage once its batch has joined;
    /// later batches are not started. A panicking worker becomes
    /// [`RegistrationError::WorkerFailed`].
    pub fn fork_join<T, R, F>(&self, stage: &str, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> Result<R> + Sync,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut pending = items.into_iter().enumerate().peekable();

        while pending.peek().is_some() {
            let batch: Vec<(usize, T)> = pending.by_ref().take(self.threads).collect();
            let outcomes: Vec<Result<R>> = self.pool.install(|| {
                batch
                    .into_par_iter()
                    .with_max_len(1)
                    .map(|(index, item)| {
                        match catch_unwind(AssertUnwindSafe(|| f(index, item))) {
                            Ok(result) => result,
                            Err(panic) => Err(RegistrationError::WorkerFailed {
                                stage: stage.to_string(),
                                index,
                                reason: panic_message(panic.as_ref()),
                            }),
                        }
                    })
                    .collect()
            });
            for outcome in outcomes {
                results.push(outcome?);
            }
        }

        Ok(results)
    }

    /// Run a closure inside the pool so nested rayon work uses its threads.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count() {
        assert_eq!(thread_count(10, 4), 4);
        assert_eq!(thread_count(2, 8), 2);
        assert_eq!(thread_count(0, 8), 1);
        assert_eq!(thread_count(5, 0), 1);
    }

    #[test]
    fn test_results_keep_input_order() {
        let pool = WorkerPool::new(7, 3).unwrap();
        let out = pool
            .fork_join("square", (0..7).collect(), |i, v: usize| {
                assert_eq!(i, v);
                Ok(v * v)
            })
            .unwrap();
        assert_eq!(out, vec![0, 1, 4, 9, 16, 25, 36]);
    }

    #[test]
    fn test_error_aborts_stage() {
        let pool = WorkerPool::new(4, 2).unwrap();
        let err = pool
            .fork_join("fail", vec![1, 2, 3, 4], |i, _v: i32| {
                if i == 2 {
                    Err(RegistrationError::primitive("boom"))
                } else {
                    Ok(i)
                }
            })
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Primitive(_)));
    }

    #[test]
    fn test_panic_becomes_worker_failure() {
        let pool = WorkerPool::new(2, 2).unwrap();
        let err = pool
            .fork_join("panic", vec![0, 1], |i, _v: i32| -> Result<()> {
                if i == 1 {
                    panic!("worker exploded");
                }
                Ok(())
            })
            .unwrap_err();
        match err {
            RegistrationError::WorkerFailed { stage, index, reason } => {
                assert_eq!(stage, "panic");
                assert_eq!(index, 1);
                assert!(reason.contains("exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

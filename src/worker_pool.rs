//! Fixed-size cooperative task executor with a barrier.
//!
//! A persistent OS thread in Rust can only run `'static` closures, but every
//! task this pool runs borrows that tick's `Octree` and `BodyStore` slice,
//! neither of which is `'static`. Keeping real persistent threads around for
//! that would need an `unsafe` lifetime transmute bounded by the join (the
//! `scoped_threadpool` pattern); nothing else in this codebase needs `unsafe`,
//! so instead each [`WorkerPool::dispatch`] call opens its own
//! `std::thread::scope` and lets the scope itself be the barrier — the same
//! trick a Lazy-SMP chess search's `ThreadPool` uses to share a non-`'static`
//! transposition table across helper threads without an `Arc`. Waiting for
//! every task to finish falls out for free as "the scope returns".

use std::collections::VecDeque;

use parking_lot::Mutex;

/// A fixed worker count, reused every [`WorkerPool::dispatch`] call. Holds no
/// thread handles between dispatches, so construction and teardown are both
/// trivial; the pool is still owned by [`crate::Engine`] and scoped to its
/// lifetime, one pool per engine instance.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    num_workers: usize,
}

impl WorkerPool {
    /// Builds a pool with exactly `num_workers` workers, clamped to at least one.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    /// Builds a pool sized to the host's available parallelism, falling back
    /// to a single worker if that can't be queried.
    pub fn hardware() -> Self {
        let n = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(n)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Runs every task in `tasks` to completion, fanning them out over a
    /// shared FIFO queue pulled by at most `num_workers` threads, and returns
    /// only once the queue is drained and every worker has exited —
    /// `wait_finished` is implicit in the scope's return.
    ///
    /// Task order across workers is not guaranteed. `parking_lot::Mutex`
    /// does not poison on panic, so callers that need a panicking task to
    /// surface as an error must catch it inside the task itself (see
    /// [`crate::Engine::update`], which turns a caught panic into
    /// [`crate::SimError::Poisoned`]) — otherwise an unguarded panic simply
    /// unwinds the spawning thread and propagates out of this scope.
    pub fn dispatch<T>(&self, tasks: Vec<T>)
    where
        T: FnOnce() + Send,
    {
        if tasks.is_empty() {
            return;
        }

        let queue: Mutex<VecDeque<T>> = Mutex::new(tasks.into_iter().collect());
        let workers = self.num_workers.min(queue.lock().len()).max(1);

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let next = queue.lock().pop_front();
                    match next {
                        Some(task) => task(),
                        None => break,
                    }
                });
            }
        });
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::hardware()
    }
}

/// Splits `total` items into `batch_count` contiguous, near-equal ranges and
/// returns the `[start, end)` bounds of `batch_index`. The first
/// `total % batch_count` batches absorb one extra item each, so every item is
/// covered exactly once regardless of whether `total` divides evenly.
pub fn batch_range(total: usize, batch_count: usize, batch_index: usize) -> (usize, usize) {
    let batch_count = batch_count.max(1);
    let mut batch_size = total / batch_count;
    if batch_index < total % batch_count {
        batch_size += 1;
    }
    let start = if batch_index < total % batch_count {
        batch_index * batch_size
    } else {
        (total % batch_count) * (batch_size + 1) + (batch_index - total % batch_count) * batch_size
    };
    (start, start + batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_runs_every_task() {
        let pool = WorkerPool::new(4);
        let counter = AtomicUsize::new(0);
        let tasks: Vec<Box<dyn FnOnce() + Send + '_>> = (0..50)
            .map(|_| -> Box<dyn FnOnce() + Send + '_> { Box::new(|| { counter.fetch_add(1, Ordering::Relaxed); }) })
            .collect();
        pool.dispatch(tasks);
        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn dispatch_can_borrow_non_static_data() {
        let pool = WorkerPool::new(2);
        let mut values = vec![0i32; 8];
        {
            let (left, right) = values.split_at_mut(4);
            let tasks: Vec<Box<dyn FnOnce() + Send + '_>> = vec![
                Box::new(|| left.iter_mut().for_each(|v| *v = 1)),
                Box::new(|| right.iter_mut().for_each(|v| *v = 2)),
            ];
            pool.dispatch(tasks);
        }
        assert_eq!(values, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn empty_dispatch_returns_immediately() {
        let pool = WorkerPool::new(4);
        pool.dispatch(Vec::<Box<dyn FnOnce() + Send>>::new());
    }

    #[test]
    fn batch_range_covers_every_index_exactly_once() {
        let total = 17;
        let batch_count = 4;
        let mut covered = vec![0u32; total];
        for b in 0..batch_count {
            let (start, end) = batch_range(total, batch_count, b);
            for i in start..end {
                covered[i] += 1;
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn batch_range_handles_more_batches_than_items() {
        let (start, end) = batch_range(2, 8, 5);
        assert_eq!(start, end);
    }
}

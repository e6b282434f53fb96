//! Fixed fan-out of CPU-bound workers.
//!
//! One round = one batch: the coordinator hands each worker an owned context
//! (its PRNG, scratch and output buffers, the indices of its span) plus
//! whatever shared state the task closure borrows read-only, then blocks
//! until every worker has reported back. Results come home over a bounded
//! channel and are reassembled in worker order, so a round is a clean
//! barrier: no worker output is observable until all of them are done, and
//! the coordinator regains exclusive access to the shared state afterwards.
//!
//! There is no work stealing; partitioning is fixed at dispatch time with
//! [`even_spans`].

use crossbeam_channel::bounded;
use std::ops::Range;
use tracing::trace;

pub struct Pool {
    workers: usize,
}

impl Pool {
    /// A pool of `workers` threads; zero is clamped to one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run one barrier-synchronized round. Worker `i` consumes
    /// `contexts[i]`; its result lands at index `i` of the returned vector.
    ///
    /// Panics if `contexts.len()` differs from the worker count. A panic
    /// inside a worker propagates to the caller when the round joins.
    pub fn run<C, T, F>(&self, contexts: Vec<C>, task: F) -> Vec<T>
    where
        C: Send,
        T: Send,
        F: Fn(usize, C) -> T + Sync,
    {
        assert_eq!(
            contexts.len(),
            self.workers,
            "one context per worker required"
        );
        trace!(target: "pool", workers = self.workers, "round_start");
        std::thread::scope(|scope| {
            let (done_tx, done_rx) = bounded::<(usize, T)>(self.workers);
            for (id, context) in contexts.into_iter().enumerate() {
                let done_tx = done_tx.clone();
                let task = &task;
                scope.spawn(move || {
                    let result = task(id, context);
                    // The receiver outlives the scope; send only fails if the
                    // coordinator already panicked.
                    let _ = done_tx.send((id, result));
                });
            }
            drop(done_tx);

            let mut results: Vec<Option<T>> = (0..self.workers).map(|_| None).collect();
            for _ in 0..self.workers {
                match done_rx.recv() {
                    Ok((id, result)) => results[id] = Some(result),
                    // A worker died without reporting; joining the scope
                    // below re-raises its panic with the original payload.
                    Err(_) => break,
                }
            }
            results
        })
        .into_iter()
        .map(|slot| slot.expect("worker finished without a result"))
        .collect()
    }
}

/// Split `count` records into `workers` contiguous spans with boundaries at
/// `i * count / workers`. Spans may be empty when records are scarce.
pub fn even_spans(count: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    (0..workers)
        .map(|i| (i * count / workers)..((i + 1) * count / workers))
        .collect()
}

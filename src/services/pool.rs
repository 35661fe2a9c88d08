//! Fixed-size worker pool over a shared claim index.
//!
//! Workers run cooperatively on the calling task: `concurrency` futures each
//! claim the next unprocessed index until the list is exhausted. A worker's
//! error is recorded against its item and the worker moves on.

use futures::future::join_all;
use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};

#[derive(Debug)]
pub struct PoolFailure<T, E> {
    pub index: usize,
    pub item: T,
    pub error: E,
}

#[derive(Debug)]
pub struct PoolReport<T, R, E> {
    /// `(index, result)` for every item whose worker succeeded, in
    /// completion order per worker.
    pub results: Vec<(usize, R)>,
    pub failures: Vec<PoolFailure<T, E>>,
}

impl<T, R, E> PoolReport<T, R, E> {
    pub fn settled(&self) -> usize {
        self.results.len() + self.failures.len()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    /// A pool of `concurrency` workers (minimum one).
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `worker` once for every item. Returns when every claimed item has
    /// settled.
    pub async fn run<'a, T, R, E, F, Fut>(&self, items: &'a [T], worker: F) -> PoolReport<T, R, E>
    where
        T: Clone,
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let next = AtomicUsize::new(0);
        let worker = &worker;
        let next = &next;

        let workers = (0..self.concurrency.min(items.len())).map(|_| async move {
            let mut results = Vec::new();
            let mut failures = Vec::new();
            loop {
                let index = next.fetch_add(1, Ordering::AcqRel);
                let Some(item) = items.get(index) else {
                    break;
                };
                match worker(item).await {
                    Ok(result) => results.push((index, result)),
                    Err(error) => failures.push(PoolFailure {
                        index,
                        item: item.clone(),
                        error,
                    }),
                }
            }
            (results, failures)
        });

        let mut report = PoolReport {
            results: Vec::with_capacity(items.len()),
            failures: Vec::new(),
        };
        for (results, failures) in join_all(workers).await {
            report.results.extend(results);
            report.failures.extend(failures);
        }
        report
    }
}

//! Resumable batch engine
//!
//! Splits a list of items into contiguous batches, runs one worker thread per
//! batch, and records each completed `(batch, index)` in a ledger through a
//! single writer thread. Re-running with the same ledger and the same input
//! skips every item already recorded, whatever the parallelism of either run.

use crate::error::{LedgerError, PipelineError};
use crate::ledger::{Completion, CompletionLog, LedgerHeader};
use crossbeam_channel::unbounded;
use std::ops::Range;
use std::thread;
use tracing::{debug, info};

/// Input to a phase: a materialised list or a stream
pub enum Items<T> {
    Concrete(Vec<T>),
    Streamed(Box<dyn Iterator<Item = T> + Send>),
}

impl<T> Items<T> {
    pub fn streamed<I>(iter: I) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        Items::Streamed(Box::new(iter))
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, Items::Streamed(_))
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Items::Concrete(items) => items,
            Items::Streamed(iter) => iter.collect(),
        }
    }
}

impl<T> From<Vec<T>> for Items<T> {
    fn from(items: Vec<T>) -> Self {
        Items::Concrete(items)
    }
}

/// How `total` items are split across workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub total: usize,
    pub batch_size: usize,
}

impl BatchPlan {
    /// Batches of `ceil(total / parallelism)` items
    pub fn new(total: usize, parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        let batch_size = total.div_ceil(parallelism).max(1);
        Self { total, batch_size }
    }

    pub fn batches(&self) -> usize {
        self.total.div_ceil(self.batch_size)
    }

    /// The plan as recorded at the head of a ledger
    pub fn header(&self) -> LedgerHeader {
        LedgerHeader {
            total: self.total as u32,
            batch_size: self.batch_size as u32,
        }
    }

    pub fn ranges(&self) -> Vec<Range<usize>> {
        (0..self.batches())
            .map(|b| {
                let start = b * self.batch_size;
                start..(start + self.batch_size).min(self.total)
            })
            .collect()
    }
}

/// Counts from one phase run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Items in the input
    pub total: usize,

    /// Items run to completion in this invocation
    pub processed: usize,

    /// Items skipped because the ledger already recorded them
    pub resumed: usize,

    pub batches: usize,
}

impl BatchReport {
    pub fn serial(total: usize) -> Self {
        Self {
            total,
            processed: total,
            resumed: 0,
            batches: usize::from(total > 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchEngine {
    parallelism: usize,
    keep_ledger: bool,
}

impl BatchEngine {
    /// One worker per logical core
    pub fn new() -> Self {
        Self {
            parallelism: num_cpus::get(),
            keep_ledger: false,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Keep the ledger after a fully successful run
    pub fn keep_ledger(mut self, keep: bool) -> Self {
        self.keep_ledger = keep;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run `f` over every item not already in `ledger`
    ///
    /// An `Err` from `f` stops that worker's batch; other batches run to
    /// completion. The first error is returned and the ledger is left in
    /// place so the next run resumes.
    pub fn run<T, F>(
        &self,
        ledger: &CompletionLog,
        items: Vec<T>,
        f: F,
    ) -> Result<BatchReport, PipelineError>
    where
        T: Send,
        F: Fn(T) -> Result<(), PipelineError> + Sync,
    {
        let plan = BatchPlan::new(items.len(), self.parallelism);
        if plan.total == 0 {
            return Ok(BatchReport::default());
        }

        let header = plan.header();
        let completed = ledger.replay(header)?;
        if !completed.is_empty() {
            info!(
                "Resuming from {} ({} items already complete)",
                ledger.path().display(),
                completed.values().map(|s| s.len()).sum::<usize>()
            );
        }
        let file = ledger.open_append(header, &completed)?;

        let mut batches: Vec<Vec<T>> = Vec::with_capacity(plan.batches());
        let mut items = items.into_iter();
        for range in plan.ranges() {
            batches.push(items.by_ref().take(range.len()).collect());
        }
        debug!(
            "Running {} items in {} batches of up to {}",
            plan.total,
            batches.len(),
            plan.batch_size
        );

        let (tx, rx) = unbounded::<Completion>();
        let f = &f;
        let completed = &completed;

        let (worker_results, writer_result) = thread::scope(|s| {
            let writer = s.spawn(move || ledger.drain(rx, file));

            let workers: Vec<_> = batches
                .into_iter()
                .enumerate()
                .map(|(b, batch)| {
                    let tx = tx.clone();
                    let batch_id = b as u32;
                    let done = completed.get(&batch_id);
                    s.spawn(move || -> Result<(usize, usize), PipelineError> {
                        let mut processed = 0;
                        let mut resumed = 0;
                        for (i, item) in batch.into_iter().enumerate() {
                            let index = i as u32;
                            if done.is_some_and(|d| d.contains(&index)) {
                                resumed += 1;
                                continue;
                            }
                            f(item)?;
                            processed += 1;
                            let _ = tx.send(Completion {
                                batch: batch_id,
                                index,
                            });
                        }
                        Ok((processed, resumed))
                    })
                })
                .collect();
            drop(tx);

            let results: Vec<_> = workers.into_iter().map(|w| w.join()).collect();
            (results, writer.join())
        });

        let mut report = BatchReport {
            total: plan.total,
            batches: plan.batches(),
            ..BatchReport::default()
        };
        let mut first_error = None;
        for result in worker_results {
            match result {
                Ok(Ok((processed, resumed))) => {
                    report.processed += processed;
                    report.resumed += resumed;
                }
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    first_error.get_or_insert(PipelineError::WorkerPanicked);
                }
            }
        }

        match writer_result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                first_error.get_or_insert(err.into());
            }
            Err(_) => {
                first_error.get_or_insert(LedgerError::WriterPanicked.into());
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if !self.keep_ledger {
            ledger.remove()?;
        }
        Ok(report)
    }
}

impl Default for BatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-item transform execution with a size-based sequential/parallel split.
//!
//! # Invariants
//! - Every dispatched item ends as committed, an accepted no-op, or a recorded
//!   failure; nothing is dropped silently.
//! - Only the caller's thread touches the database. Workers see item
//!   snapshots and in-memory payloads.
//! - The task queue is bounded; a full queue blocks the submitter.

use super::transform::{ReadSeek, Transform, TransformFailure, TransformInput, TransformOutput};
use crate::blob::{BlobRepository, SqliteBlobStore};
use crate::config::ExecutorConfig;
use crate::error::StoreResult;
use crate::logging::panic_payload_summary;
use crate::model::{BlobHash, ItemId, Modelitem};
use log::{info, warn};
use std::io::{Cursor, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

/// One item scheduled for a transform.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub item: Modelitem,
    /// Blob handed to the transform as payload.
    pub payload: Option<BlobHash>,
    /// Estimated cost in payload bytes.
    pub cost: u64,
}

/// How the sink settled one transform result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Output was written; `produced` counts newly created modelitems.
    Committed { produced: u64 },
    NoOp,
    Rejected(TransformFailure),
}

/// A failed item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub stage: String,
    pub model: String,
    pub item_id: ItemId,
    pub failure: TransformFailure,
}

/// Counts for one executed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub dispatched: u64,
    pub sequential: u64,
    pub parallel: u64,
    pub succeeded: u64,
    pub no_ops: u64,
    pub produced: u64,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    /// True when every item was committed or accepted as a no-op.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.succeeded + self.no_ops == self.dispatched
    }

    fn record(&mut self, stage: &str, work: &WorkItem, disposition: Disposition) {
        match disposition {
            Disposition::Committed { produced } => {
                self.succeeded += 1;
                self.produced += produced;
            }
            Disposition::NoOp => self.no_ops += 1,
            Disposition::Rejected(failure) => self.failures.push(ItemFailure {
                stage: stage.to_string(),
                model: work.item.model.clone(),
                item_id: work.item.id,
                failure,
            }),
        }
    }
}

type TransformResult = Result<TransformOutput, TransformFailure>;

struct Task {
    index: usize,
    payload: Option<Vec<u8>>,
}

/// Runs transforms over batches on a bounded pool of scoped worker threads.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    workers: usize,
    queue_capacity: usize,
    cost_threshold: u64,
}

impl ParallelExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            cost_threshold: config.cost_threshold,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether `cost` is run on the caller's thread.
    pub fn runs_sequentially(&self, cost: u64) -> bool {
        cost >= self.cost_threshold
    }

    /// Transforms every item of `batch` and hands each result to `sink` on
    /// the caller's thread.
    ///
    /// # Errors
    /// - The first error returned by `sink`, after in-flight work has drained.
    /// - Storage errors while reading payloads or spawning workers.
    pub fn execute<F>(
        &self,
        blobs: &SqliteBlobStore<'_>,
        transform: &dyn Transform,
        batch: &[WorkItem],
        mut sink: F,
    ) -> StoreResult<BatchReport>
    where
        F: FnMut(&WorkItem, TransformResult) -> StoreResult<Disposition>,
    {
        let started_at = Instant::now();
        let stage = transform.name();
        let mut report = BatchReport {
            dispatched: batch.len() as u64,
            ..BatchReport::default()
        };

        let (heavy, light): (Vec<usize>, Vec<usize>) =
            (0..batch.len()).partition(|&index| self.runs_sequentially(batch[index].cost));

        for &index in &heavy {
            let work = &batch[index];
            let result = match &work.payload {
                Some(hash) => {
                    let mut reader = blobs.open(hash)?;
                    run_guarded(transform, &work.item, Some(&mut reader))
                }
                None => run_guarded(transform, &work.item, None),
            };
            report.sequential += 1;
            let disposition = sink(work, result)?;
            report.record(stage, work, disposition);
        }

        if !light.is_empty() {
            report.parallel = light.len() as u64;
            self.run_pool(blobs, transform, batch, &light, &mut sink, &mut report)?;
        }

        let status = if report.failures.is_empty() { "ok" } else { "error" };
        info!(
            "event=executor_batch module=pipeline status={status} stage={stage} dispatched={} sequential={} parallel={} succeeded={} no_ops={} failures={} duration_ms={}",
            report.dispatched,
            report.sequential,
            report.parallel,
            report.succeeded,
            report.no_ops,
            report.failures.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn run_pool<F>(
        &self,
        blobs: &SqliteBlobStore<'_>,
        transform: &dyn Transform,
        batch: &[WorkItem],
        light: &[usize],
        sink: &mut F,
        report: &mut BatchReport,
    ) -> StoreResult<()>
    where
        F: FnMut(&WorkItem, TransformResult) -> StoreResult<Disposition>,
    {
        let stage = transform.name();
        let workers = self.workers.min(light.len());
        let (task_tx, task_rx) = mpsc::sync_channel::<Task>(self.queue_capacity);
        let task_rx = Mutex::new(task_rx);

        thread::scope(|scope| -> StoreResult<()> {
            // Moved in so any early return closes the queue and the workers exit.
            let task_tx = task_tx;
            let (result_tx, result_rx) = mpsc::channel::<(usize, TransformResult)>();

            for worker in 0..workers {
                let task_rx = &task_rx;
                let result_tx = result_tx.clone();
                thread::Builder::new()
                    .name(format!("modelbase-worker-{worker}"))
                    .spawn_scoped(scope, move || worker_loop(transform, batch, task_rx, result_tx))?;
            }
            drop(result_tx);

            let mut settle = |index: usize, result: TransformResult| -> StoreResult<()> {
                let work = &batch[index];
                let disposition = sink(work, result)?;
                report.record(stage, work, disposition);
                Ok(())
            };

            let submitted = submit_all(blobs, batch, light, &task_tx, &result_rx, &mut settle);
            drop(task_tx);

            let mut outcome = submitted;
            for (index, result) in result_rx.iter() {
                if outcome.is_ok() {
                    outcome = settle(index, result);
                }
            }
            if outcome.is_err() {
                warn!(
                    "event=executor_batch module=pipeline status=error stage={stage} reason=sink_failed"
                );
            }
            outcome
        })
    }
}

/// Feeds tasks into the bounded queue, settling finished results in between.
fn submit_all(
    blobs: &SqliteBlobStore<'_>,
    batch: &[WorkItem],
    light: &[usize],
    task_tx: &SyncSender<Task>,
    result_rx: &Receiver<(usize, TransformResult)>,
    settle: &mut dyn FnMut(usize, TransformResult) -> StoreResult<()>,
) -> StoreResult<()> {
    for &index in light {
        let payload = match &batch[index].payload {
            Some(hash) => {
                let mut bytes = Vec::new();
                blobs.open(hash)?.read_to_end(&mut bytes)?;
                Some(bytes)
            }
            None => None,
        };
        if task_tx.send(Task { index, payload }).is_err() {
            break;
        }
        while let Ok((index, result)) = result_rx.try_recv() {
            settle(index, result)?;
        }
    }
    Ok(())
}

fn worker_loop(
    transform: &dyn Transform,
    batch: &[WorkItem],
    tasks: &Mutex<Receiver<Task>>,
    results: Sender<(usize, TransformResult)>,
) {
    loop {
        let task = {
            let guard = tasks.lock().unwrap_or_else(PoisonError::into_inner);
            guard.recv()
        };
        let Ok(task) = task else {
            return;
        };
        let item = &batch[task.index];
        let result = match task.payload {
            Some(bytes) => {
                let mut cursor = Cursor::new(bytes);
                run_guarded(transform, &item.item, Some(&mut cursor))
            }
            None => run_guarded(transform, &item.item, None),
        };
        if results.send((task.index, result)).is_err() {
            return;
        }
    }
}

/// Runs one transform call, turning a panic into that item's failure.
fn run_guarded<'a>(
    transform: &dyn Transform,
    item: &'a Modelitem,
    payload: Option<&'a mut dyn ReadSeek>,
) -> TransformResult {
    let input = TransformInput { item, payload };
    match catch_unwind(AssertUnwindSafe(|| transform.transform(input))) {
        Ok(result) => result,
        Err(payload) => Err(TransformFailure::new(format!(
            "transform panicked: {}",
            panic_payload_summary(&*payload)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchReport, Disposition, ItemFailure, ParallelExecutor};
    use crate::config::ExecutorConfig;
    use crate::pipeline::TransformFailure;
    use uuid::Uuid;

    #[test]
    fn cost_threshold_splits_sequential_from_parallel() {
        let executor = ParallelExecutor::new(&ExecutorConfig {
            workers: 0,
            queue_capacity: 0,
            cost_threshold: 100,
        });
        assert_eq!(executor.workers(), 1);
        assert!(executor.runs_sequentially(100));
        assert!(executor.runs_sequentially(101));
        assert!(!executor.runs_sequentially(99));
    }

    #[test]
    fn batch_success_requires_every_item_accounted_for() {
        let mut report = BatchReport {
            dispatched: 2,
            succeeded: 1,
            no_ops: 1,
            ..BatchReport::default()
        };
        assert!(report.is_success());

        report.failures.push(ItemFailure {
            stage: "unzip".to_string(),
            model: "file".to_string(),
            item_id: Uuid::new_v4(),
            failure: TransformFailure::new("bad archive"),
        });
        assert!(!report.is_success());
        assert_ne!(
            Disposition::Rejected(TransformFailure::new("x")),
            Disposition::NoOp
        );
    }
}

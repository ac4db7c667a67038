//! Multi-round derivation state machine.
//!
//! # Invariants
//! - A round runs inside one savepoint; each item commits in a nested one.
//! - A storage failure rolls the whole round back, markers included.
//! - Cancellation is only observed at round boundaries.
//! - Scanning a converged store writes nothing.

use super::executor::{Disposition, ItemFailure, ParallelExecutor, WorkItem};
use super::marker::{self, MarkerStatus};
use super::transform::{Transform, TransformFailure, TransformOutput};
use crate::blob::BlobRepository;
use crate::db::Savepoint;
use crate::error::{ErrorKind, StoreError, StoreResult};
use crate::model::InsertOrigin;
use crate::repo::{ItemRepository, SqliteItemRepository};
use crate::schema::RegisteredModel;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative stop request shared between a pipeline and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a pipeline run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A scan found no eligible work.
    Converged,
    /// Work was still eligible after the last permitted round.
    RoundLimitReached,
    Cancelled,
}

impl Termination {
    fn label(self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::RoundLimitReached => "round_limit_reached",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Scanning,
    Dispatching,
    Committing,
    Done(Termination),
}

/// Counters of one completed round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u32,
    /// Unmarked items matching the stages' candidate predicates.
    pub candidates: u64,
    /// Candidates that passed `is_eligible`.
    pub eligible: u64,
    /// Modelitems newly created by derived inserts.
    pub produced: u64,
    pub committed: u64,
    pub no_ops: u64,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub termination: Termination,
    pub rounds: Vec<RoundReport>,
}

impl PipelineReport {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }

    pub fn produced(&self) -> u64 {
        self.rounds.iter().map(|round| round.produced).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.rounds.iter().flat_map(|round| round.failures.iter())
    }
}

/// Ordered transformation stages applied round after round.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
    max_rounds: Option<u32>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, transform: impl Transform + 'static) -> Self {
        self.stages.push(Box::new(transform));
        self
    }

    /// Overrides the configured round limit.
    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.name())
    }

    pub(crate) fn start<'p, 'conn>(
        &'p self,
        repo: SqliteItemRepository<'conn>,
    ) -> PipelineRun<'p, 'conn> {
        let config = repo.config();
        PipelineRun {
            pipeline: self,
            repo,
            executor: ParallelExecutor::new(&config.executor),
            max_rounds: self.max_rounds.unwrap_or(config.pipeline.max_rounds),
            state: PipelineState::Scanning,
            round: 0,
            planned: Vec::new(),
            round_savepoint: None,
            current: None,
            rounds: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Clears failed markers of every stage so those items are retried.
    pub(crate) fn reset_failed(&self, repo: &SqliteItemRepository<'_>) -> StoreResult<u64> {
        let mut cleared = 0;
        for stage in &self.stages {
            cleared += marker::reset_failed(repo.conn(), stage.name())?;
        }
        info!("event=pipeline_reset module=pipeline status=ok cleared={cleared}");
        Ok(cleared)
    }
}

/// Eligible work of one stage, captured at round start.
struct StageBatch {
    stage: usize,
    items: Vec<WorkItem>,
}

/// One pipeline invocation, advanced explicitly with [`PipelineRun::step`].
///
/// Dropping a run in the middle of a round rolls that round back.
pub struct PipelineRun<'p, 'conn> {
    pipeline: &'p Pipeline,
    repo: SqliteItemRepository<'conn>,
    executor: ParallelExecutor,
    max_rounds: u32,
    state: PipelineState,
    round: u32,
    planned: Vec<StageBatch>,
    round_savepoint: Option<Savepoint<'conn>>,
    current: Option<RoundReport>,
    rounds: Vec<RoundReport>,
    started_at: Instant,
}

impl<'p, 'conn> PipelineRun<'p, 'conn> {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of the current or last completed round; 0 before the first.
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn rounds(&self) -> &[RoundReport] {
        &self.rounds
    }

    /// Performs one state transition and returns the new state.
    ///
    /// # Errors
    /// Storage failures while dispatching roll the round back; the run returns
    /// to `Scanning` and may be stepped again.
    pub fn step(&mut self) -> StoreResult<PipelineState> {
        match self.state {
            PipelineState::Scanning => self.scan()?,
            PipelineState::Dispatching => {
                if let Err(err) = self.dispatch() {
                    self.abort_round(&err);
                    return Err(err);
                }
            }
            PipelineState::Committing => self.commit_round()?,
            PipelineState::Done(_) => {}
        }
        Ok(self.state)
    }

    /// Steps until the run terminates.
    pub fn run(mut self) -> StoreResult<PipelineReport> {
        loop {
            if let PipelineState::Done(termination) = self.step()? {
                return Ok(PipelineReport {
                    termination,
                    rounds: std::mem::take(&mut self.rounds),
                });
            }
        }
    }

    fn scan(&mut self) -> StoreResult<()> {
        if self.pipeline.cancel.is_cancelled() {
            self.finish(Termination::Cancelled);
            return Ok(());
        }

        let mut candidates = 0;
        let mut planned = Vec::new();
        for (stage, transform) in self.pipeline.stages.iter().enumerate() {
            let (found, items) = self.plan_stage(transform.as_ref())?;
            candidates += found;
            if !items.is_empty() {
                planned.push(StageBatch { stage, items });
            }
        }
        let eligible = planned.iter().map(|batch| batch.items.len() as u64).sum::<u64>();

        if eligible == 0 {
            self.finish(Termination::Converged);
            return Ok(());
        }
        if self.round >= self.max_rounds {
            self.finish(Termination::RoundLimitReached);
            return Ok(());
        }

        self.round_savepoint = Some(Savepoint::begin(self.repo.conn(), "pipeline_round")?);
        self.round += 1;
        self.planned = planned;
        self.current = Some(RoundReport {
            round: self.round,
            candidates,
            eligible,
            ..RoundReport::default()
        });
        self.state = PipelineState::Dispatching;
        info!(
            "event=pipeline_round module=pipeline status=start round={} candidates={candidates} eligible={eligible}",
            self.round
        );
        Ok(())
    }

    /// Unmarked candidates of one stage and the eligible subset as work items.
    fn plan_stage(&self, transform: &dyn Transform) -> StoreResult<(u64, Vec<WorkItem>)> {
        let model = self.repo.registry().lookup(transform.source_model())?;
        let selection =
            self.repo
                .select_unmarked(&model, &transform.candidates(), transform.name())?;
        let blobs = self.repo.blobs();

        let mut candidates = 0;
        let mut items = Vec::new();
        for item in selection.iter() {
            let item = item?;
            candidates += 1;
            if !transform.is_eligible(&item) {
                continue;
            }
            let payload = transform
                .payload_field()
                .and_then(|field| item.blob(field).cloned());
            let cost = match &payload {
                Some(hash) => blobs.handle(hash)?.map_or(0, |handle| handle.length),
                None => 0,
            };
            items.push(WorkItem {
                item,
                payload,
                cost,
            });
        }
        Ok((candidates, items))
    }

    fn dispatch(&mut self) -> StoreResult<()> {
        let planned = std::mem::take(&mut self.planned);
        let repo = self.repo;
        let blobs = repo.blobs();

        for batch in planned {
            let transform = self.pipeline.stages[batch.stage].as_ref();
            let stage = transform.name();
            let report = self.executor.execute(&blobs, transform, &batch.items, |work, result| {
                commit_item(&repo, stage, work, result)
            })?;
            if let Some(current) = self.current.as_mut() {
                current.committed += report.succeeded;
                current.no_ops += report.no_ops;
                current.produced += report.produced;
                current.failures.extend(report.failures);
            }
        }
        self.state = PipelineState::Committing;
        Ok(())
    }

    fn commit_round(&mut self) -> StoreResult<()> {
        self.state = PipelineState::Scanning;
        if let Some(savepoint) = self.round_savepoint.take() {
            savepoint.commit()?;
        }
        if let Some(report) = self.current.take() {
            let status = if report.failures.is_empty() { "ok" } else { "error" };
            info!(
                "event=pipeline_round module=pipeline status={status} round={} produced={} committed={} no_ops={} failures={}",
                report.round,
                report.produced,
                report.committed,
                report.no_ops,
                report.failures.len()
            );
            self.rounds.push(report);
        }
        Ok(())
    }

    fn abort_round(&mut self, cause: &StoreError) {
        if let Some(savepoint) = self.round_savepoint.take() {
            if let Err(err) = savepoint.rollback() {
                error!(
                    "event=pipeline_round module=pipeline status=error round={} reason=rollback_failed error={err}",
                    self.round
                );
            }
        }
        warn!(
            "event=pipeline_round module=pipeline status=error round={} reason=aborted kind={:?} error={cause}",
            self.round,
            cause.kind()
        );
        self.planned.clear();
        self.current = None;
        self.round = self.round.saturating_sub(1);
        self.state = PipelineState::Scanning;
    }

    fn finish(&mut self, termination: Termination) {
        self.state = PipelineState::Done(termination);
        info!(
            "event=pipeline_run module=pipeline status=ok termination={} rounds={} duration_ms={}",
            termination.label(),
            self.rounds.len(),
            self.started_at.elapsed().as_millis()
        );
    }
}

/// Writes one transform result and marks the source item.
fn commit_item(
    repo: &SqliteItemRepository<'_>,
    stage: &str,
    work: &WorkItem,
    result: Result<TransformOutput, TransformFailure>,
) -> StoreResult<Disposition> {
    let conn = repo.conn();
    let item = &work.item;
    let output = match result {
        Ok(output) => output,
        Err(failure) => return reject(repo, stage, work, failure),
    };
    if output.is_no_op() {
        marker::mark(conn, stage, &item.model, item.id, MarkerStatus::Done, None)?;
        return Ok(Disposition::NoOp);
    }

    let savepoint = Savepoint::begin(conn, "pipeline_item")?;
    match apply_output(repo, work, output) {
        Ok(produced) => {
            marker::mark(conn, stage, &item.model, item.id, MarkerStatus::Done, None)?;
            savepoint.commit()?;
            Ok(Disposition::Committed { produced })
        }
        Err(err) if rejects_item(&err) => {
            savepoint.rollback()?;
            reject(repo, stage, work, TransformFailure::new(err.to_string()))
        }
        Err(err) => Err(err),
    }
}

fn apply_output(
    repo: &SqliteItemRepository<'_>,
    work: &WorkItem,
    output: TransformOutput,
) -> StoreResult<u64> {
    let registry = repo.registry();
    let mut produced = 0;
    for request in output.inserts {
        let target: RegisteredModel = registry.lookup(&request.model)?;
        if repo.insert(&target, request.values, InsertOrigin::Derived)?.created {
            produced += 1;
        }
    }
    if let Some(update) = output.update.filter(|update| !update.is_empty()) {
        let source = registry.lookup(&work.item.model)?;
        repo.update(&source, work.item.id, update)?;
    }
    Ok(produced)
}

fn reject(
    repo: &SqliteItemRepository<'_>,
    stage: &str,
    work: &WorkItem,
    failure: TransformFailure,
) -> StoreResult<Disposition> {
    let item = &work.item;
    marker::mark(
        repo.conn(),
        stage,
        &item.model,
        item.id,
        MarkerStatus::Failed,
        Some(failure.message()),
    )?;
    warn!(
        "event=pipeline_item module=pipeline status=error stage={stage} model={} id={}",
        item.model, item.id
    );
    Ok(Disposition::Rejected(failure))
}

/// Caller or data errors fail the item; anything else aborts the round.
fn rejects_item(err: &StoreError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ValidationError
            | ErrorKind::DuplicateError
            | ErrorKind::NotFound
            | ErrorKind::CodecError
    )
}

#[cfg(test)]
mod tests {
    use super::{rejects_item, CancelToken, PipelineReport, RoundReport, Termination};
    use crate::db::DbError;
    use crate::error::{NotFound, StoreError};
    use crate::model::ValidationError;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn data_errors_fail_items_but_storage_errors_abort() {
        assert!(rejects_item(&StoreError::from(ValidationError::MissingRequired {
            field: "name".to_string()
        })));
        assert!(rejects_item(&StoreError::from(NotFound::Model("x".to_string()))));
        assert!(!rejects_item(&StoreError::from(DbError::Io(std::io::Error::other(
            "disk full"
        )))));
    }

    #[test]
    fn report_sums_rounds() {
        let report = PipelineReport {
            termination: Termination::RoundLimitReached,
            rounds: vec![
                RoundReport {
                    round: 1,
                    produced: 2,
                    ..RoundReport::default()
                },
                RoundReport {
                    round: 2,
                    produced: 3,
                    ..RoundReport::default()
                },
            ],
        };
        assert!(!report.converged());
        assert_eq!(report.produced(), 5);
        assert_eq!(report.failures().count(), 0);
    }
}

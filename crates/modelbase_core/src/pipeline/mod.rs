//! Derivation pipeline: repeated transform rounds until a fixpoint.
//!
//! # Responsibility
//! - Define the contract transformation models implement.
//! - Find unprocessed items, run transforms over them, and write results back.
//! - Record per-stage processed markers so later runs skip finished work.
//!
//! # Invariants
//! - Reaching the round limit is reported apart from convergence.
//! - Per-item failures never abort a round; storage failures always do.

mod executor;
mod marker;
mod runner;
mod transform;

pub use executor::{BatchReport, Disposition, ItemFailure, ParallelExecutor, WorkItem};
pub use marker::MarkerStatus;
pub(crate) use marker::{count as marker_count, status as marker_status};
pub use runner::{
    CancelToken, Pipeline, PipelineReport, PipelineRun, PipelineState, RoundReport, Termination,
};
pub use transform::{
    InsertRequest, ReadSeek, Transform, TransformFailure, TransformInput, TransformOutput,
};

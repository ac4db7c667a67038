//! Object store: modelitem persistence and predicate queries.
//!
//! # Responsibility
//! - Define the modelitem data access contract.
//! - Keep SQL for per-model tables inside this boundary.
//!
//! # Invariants
//! - Predicates always run as one SQL query per page, never as a caller-side scan.
//! - Repository APIs return semantic errors (`NotFound`, `Duplicate`) in
//!   addition to storage errors.

mod item_repo;
mod predicate;
mod selection;

pub use item_repo::{InsertOutcome, ItemRepository, SqliteItemRepository};
pub use predicate::{Condition, Predicate};
pub use selection::{ItemIter, ItemSelection};

//! Use-case level entry points.
//!
//! # Responsibility
//! - Orchestrate registry, repository, search and pipeline calls behind one handle.
//! - Keep callers decoupled from connection and savepoint details.

pub mod store;

//! Schema registry for declarative model definitions.
//!
//! # Responsibility
//! - Validate model definitions before any table exists for them.
//! - Create per-model tables and persist definitions for later sessions.
//! - Enforce non-decreasing versions without migrating stored data.
//!
//! # Invariants
//! - A registered model name maps to exactly one table.
//! - Re-registering a different shape under an existing name always fails.

mod names;
mod registry;
mod tables;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub use names::table_name_for;
pub use registry::{RegisteredModel, SchemaRegistry};

/// An invalid model definition, or one incompatible with what is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidModelName(String),
    InvalidFieldName {
        model: String,
        field: String,
    },
    DuplicateField {
        model: String,
        field: String,
    },
    NoFields(String),
    InvalidEnum {
        model: String,
        field: String,
        message: String,
    },
    UnknownReferenceTarget {
        model: String,
        field: String,
        target: String,
    },
    TableNameCollision {
        model: String,
        table: String,
    },
    VersionRegression {
        model: String,
        registered: u32,
        requested: u32,
    },
    IncompatibleRedefinition {
        model: String,
        registered: u32,
        requested: u32,
    },
    StoredDefinition {
        model: String,
        message: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidModelName(name) => write!(f, "invalid model name `{name}`"),
            Self::InvalidFieldName { model, field } => {
                write!(f, "invalid field name `{field}` in model `{model}`")
            }
            Self::DuplicateField { model, field } => {
                write!(f, "field `{field}` declared twice in model `{model}`")
            }
            Self::NoFields(model) => write!(f, "model `{model}` declares no fields"),
            Self::InvalidEnum {
                model,
                field,
                message,
            } => write!(f, "enum of `{model}.{field}` is invalid: {message}"),
            Self::UnknownReferenceTarget {
                model,
                field,
                target,
            } => write!(
                f,
                "`{model}.{field}` references unregistered model `{target}`"
            ),
            Self::TableNameCollision { model, table } => {
                write!(f, "model `{model}` maps to table `{table}`, which is taken")
            }
            Self::VersionRegression {
                model,
                registered,
                requested,
            } => write!(
                f,
                "model `{model}` is registered at version {registered}; version {requested} is older"
            ),
            Self::IncompatibleRedefinition {
                model,
                registered,
                requested,
            } => write!(
                f,
                "model `{model}` version {requested} differs from registered version {registered}; schemas are not migrated"
            ),
            Self::StoredDefinition { model, message } => {
                write!(f, "stored definition of `{model}` is unreadable: {message}")
            }
        }
    }
}

impl Error for SchemaError {}

use super::item::ItemId;
use super::value::BlobHash;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// A field value (or predicate operand) that does not fit its field definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownField {
        model: String,
        field: String,
    },
    MissingRequired {
        field: String,
    },
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    ExpectedSequence {
        field: String,
    },
    UnexpectedSequence {
        field: String,
    },
    UnknownEnumMember {
        field: String,
        member: String,
    },
    NotANumber {
        field: String,
    },
    OutOfRange {
        field: String,
        message: String,
    },
    DanglingReference {
        field: String,
        model: String,
        id: ItemId,
    },
    UnknownBlob {
        field: String,
        hash: BlobHash,
    },
    UnsupportedPredicate {
        field: String,
        reason: &'static str,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { model, field } => {
                write!(f, "model `{model}` has no field `{field}`")
            }
            Self::MissingRequired { field } => write!(f, "required field `{field}` is missing"),
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` expects {expected}, got {found}"),
            Self::ExpectedSequence { field } => {
                write!(f, "field `{field}` is a sequence; supply a list of values")
            }
            Self::UnexpectedSequence { field } => {
                write!(f, "field `{field}` holds a single value, not a sequence")
            }
            Self::UnknownEnumMember { field, member } => {
                write!(f, "`{member}` is not a member of the enum of field `{field}`")
            }
            Self::NotANumber { field } => write!(f, "field `{field}` cannot store NaN"),
            Self::OutOfRange { field, message } => {
                write!(f, "field `{field}` value out of range: {message}")
            }
            Self::DanglingReference { field, model, id } => {
                write!(f, "field `{field}` references missing `{model}` item {id}")
            }
            Self::UnknownBlob { field, hash } => {
                write!(f, "field `{field}` references unknown blob {hash}")
            }
            Self::UnsupportedPredicate { field, reason } => {
                write!(f, "unsupported condition on field `{field}`: {reason}")
            }
        }
    }
}

impl Error for ValidationError {}

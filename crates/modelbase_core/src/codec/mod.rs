//! Field codec between typed values and relational storage values.
//!
//! # Responsibility
//! - Encode every field type to one SQLite value and decode it back exactly.
//! - Lay out sequences as an element count plus ordered element rows.
//! - Fingerprint dedup-significant content.
//!
//! # Invariants
//! - Enum members are stored by symbolic name.
//! - Blob fields store the content hash; reference fields store the identity.
//! - Decoding never coerces an unexpected storage value; it fails instead.

mod field_codec;
mod fingerprint;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub use field_codec::{
    decode, decode_timestamp, decode_value, encode, encode_timestamp, encode_value, StoredField,
};
pub use fingerprint::fingerprint;

/// A stored representation that does not decode under its field definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Unrecognized {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    Malformed {
        field: String,
        message: String,
    },
    SequenceLength {
        field: String,
        declared: i64,
        found: usize,
    },
    UnexpectedNull {
        field: String,
    },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrecognized {
                field,
                expected,
                found,
            } => write!(
                f,
                "stored value of `{field}` is {found}, expected {expected}"
            ),
            Self::Malformed { field, message } => {
                write!(f, "stored value of `{field}` is malformed: {message}")
            }
            Self::SequenceLength {
                field,
                declared,
                found,
            } => write!(
                f,
                "sequence `{field}` declares {declared} elements but {found} are stored"
            ),
            Self::UnexpectedNull { field } => {
                write!(f, "required field `{field}` is stored as NULL")
            }
        }
    }
}

impl Error for CodecError {}

//! Declarative model definitions and typed modelitem values.
//!
//! # Responsibility
//! - Describe models as ordered field definitions plus a dedup policy.
//! - Carry typed field values between callers, the codec and the object store.
//!
//! # Invariants
//! - Every modelitem is identified by a stable `ItemId` that is never reused.
//! - A `FieldValue::Null` is distinct from an empty `FieldValue::Many`.

mod dedup;
mod definition;
mod item;
mod validation;
mod value;

pub use dedup::{DedupAction, DedupPolicy, InsertOrigin};
pub use definition::{EnumDefinition, FieldDefinition, FieldType, ModelDefinition};
pub use item::{ItemId, Modelitem};
pub use validation::ValidationError;
pub use value::{BlobHash, FieldValue, FieldValues, Value};

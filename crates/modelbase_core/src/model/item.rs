//! Stored modelitem records.

use super::value::{BlobHash, FieldValue, FieldValues, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Stable identity of a modelitem; the target of cross-model references.
pub type ItemId = Uuid;

/// One typed record of a registered model, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Modelitem {
    pub id: ItemId,
    pub model: String,
    pub values: FieldValues,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Modelitem {
    /// `FieldValue::Null` for unknown names.
    pub fn field(&self, name: &str) -> &FieldValue {
        const NULL: &FieldValue = &FieldValue::Null;
        self.values.get(name).unwrap_or(NULL)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.field(name).as_one()
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_integer)
    }

    pub fn blob(&self, name: &str) -> Option<&BlobHash> {
        self.value(name).and_then(Value::as_blob)
    }

    pub fn reference(&self, name: &str) -> Option<ItemId> {
        self.value(name).and_then(Value::as_reference)
    }

    /// Elements of a sequence field (empty when absent).
    pub fn sequence(&self, name: &str) -> &[Value] {
        self.field(name).values()
    }
}

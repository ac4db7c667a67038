//! Typed field values.

use super::item::ItemId;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use time::{Date, Duration, OffsetDateTime};

/// Lowercase hex SHA-256 digest identifying a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHash(String);

impl BlobHash {
    pub const HEX_LEN: usize = 64;

    /// Accepts 64 hex digits in either case; stores them lowercase.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == Self::HEX_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BlobHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One typed value of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Datetime(OffsetDateTime),
    Date(Date),
    Integer(i64),
    String(String),
    Bytes(Vec<u8>),
    Boolean(bool),
    TimeDelta(Duration),
    Float(f64),
    Blob(BlobHash),
    /// Symbolic enum member name.
    Enum(String),
    Reference(ItemId),
}

impl Value {
    pub fn enum_member(member: impl Into<String>) -> Self {
        Self::Enum(member.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Datetime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Boolean(_) => "boolean",
            Self::TimeDelta(_) => "time_delta",
            Self::Float(_) => "float",
            Self::Blob(_) => "blob",
            Self::Enum(_) => "enum",
            Self::Reference(_) => "reference",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::Enum(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobHash> {
        match self {
            Self::Blob(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ItemId> {
        match self {
            Self::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<BlobHash> for Value {
    fn from(value: BlobHash) -> Self {
        Self::Blob(value)
    }
}

impl From<ItemId> for Value {
    fn from(value: ItemId) -> Self {
        Self::Reference(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Self::Datetime(value)
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Self::TimeDelta(value)
    }
}

/// Value of one field: absent, a single value, or an ordered sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    One(Value),
    Many(Vec<Value>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_one(&self) -> Option<&Value> {
        match self {
            Self::One(value) => Some(value),
            _ => None,
        }
    }

    /// Sequence elements; a scalar yields one element and `Null` yields none.
    pub fn values(&self) -> &[Value] {
        match self {
            Self::Null => &[],
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }
}

macro_rules! scalar_field_value {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for FieldValue {
                fn from(value: $source) -> Self {
                    Self::One(value.into())
                }
            }
        )*
    };
}

scalar_field_value!(
    Value,
    &str,
    String,
    i64,
    bool,
    f64,
    BlobHash,
    ItemId,
    OffsetDateTime,
    Date,
    Duration,
);

impl From<Vec<Value>> for FieldValue {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

/// Field name to value map handed to insert and update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldValues(BTreeMap<String, FieldValue>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{BlobHash, FieldValue, FieldValues, Value};

    #[test]
    fn blob_hash_parse_normalizes_case_and_rejects_garbage() {
        let upper = "AB".repeat(32);
        let parsed = BlobHash::parse(&upper).expect("64 hex digits");
        assert_eq!(parsed.as_str(), "ab".repeat(32));
        assert!(BlobHash::parse("abc").is_none());
        assert!(BlobHash::parse(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn field_value_distinguishes_null_from_empty_sequence() {
        let null = FieldValue::Null;
        let empty = FieldValue::Many(Vec::new());
        assert_ne!(null, empty);
        assert!(null.values().is_empty());
        assert!(empty.values().is_empty());
        assert_eq!(FieldValue::from(3_i64).values(), &[Value::Integer(3)]);
    }

    #[test]
    fn field_values_builder_overwrites() {
        let values = FieldValues::new()
            .with("name", "a")
            .with("name", "b")
            .with("size", 2_i64);
        assert_eq!(values.len(), 2);
        assert_eq!(
            values.get("name"),
            Some(&FieldValue::One(Value::String("b".to_string())))
        );
    }
}

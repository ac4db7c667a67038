//! Model and field definitions.

use super::dedup::DedupPolicy;
use serde::{Deserialize, Serialize};

/// Named, ordered set of symbolic enum members.
///
/// Members are stored by name, so reordering them never changes stored data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDefinition {
    pub name: String,
    pub members: Vec<String>,
}

impl EnumDefinition {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.iter().any(|candidate| candidate == member)
    }
}

/// Declared type of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    /// Date-time with a UTC offset.
    Datetime,
    Date,
    Integer,
    String,
    Bytes,
    Boolean,
    /// Signed duration with nanosecond precision.
    TimeDelta,
    Float,
    /// Content hash of a blob in the blob store.
    Blob,
    Enum(EnumDefinition),
    /// Identity of a modelitem in `model`.
    Reference { model: String },
}

impl FieldType {
    /// Stable lowercase label used in metadata tables and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Datetime => "datetime",
            Self::Date => "date",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Boolean => "boolean",
            Self::TimeDelta => "time_delta",
            Self::Float => "float",
            Self::Blob => "blob",
            Self::Enum(_) => "enum",
            Self::Reference { .. } => "reference",
        }
    }

    /// Whether free-text search looks inside values of this type.
    pub fn is_searchable(&self) -> bool {
        matches!(self, Self::String | Self::Bytes | Self::Blob)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Holds zero or more values of `field_type` instead of exactly one.
    #[serde(default)]
    pub sequence: bool,
    /// Participates in the content fingerprint used for dedup.
    #[serde(default = "default_true")]
    pub dedup: bool,
}

impl FieldDefinition {
    /// Nullable, single-valued, dedup-significant field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            sequence: false,
            dedup: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn sequence(mut self) -> Self {
        self.sequence = true;
        self
    }

    pub fn excluded_from_dedup(mut self) -> Self {
        self.dedup = false;
        self
    }
}

/// Declarative schema for one family of modelitems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: u32,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub implicit_dedup: bool,
    #[serde(default)]
    pub fail_on_dup: bool,
}

impl ModelDefinition {
    /// Empty definition with both dedup flags off.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version,
            fields: Vec::new(),
            implicit_dedup: false,
            fail_on_dup: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn implicit_dedup(mut self, enabled: bool) -> Self {
        self.implicit_dedup = enabled;
        self
    }

    pub fn fail_on_dup(mut self, enabled: bool) -> Self {
        self.fail_on_dup = enabled;
        self
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy::from_flags(self.implicit_dedup, self.fail_on_dup)
    }

    /// Same fields and dedup flags, ignoring version and description.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.name == other.name
            && self.fields == other.fields
            && self.implicit_dedup == other.implicit_dedup
            && self.fail_on_dup == other.fail_on_dup
    }
}

use super::CodecError;
use crate::model::{BlobHash, FieldDefinition, FieldType, FieldValue, ValidationError, Value};
use rusqlite::types::Value as SqlValue;
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
/// Signed year, nanoseconds and a full `hh:mm:ss` offset, so every
/// `OffsetDateTime` survives a round trip.
const DATETIME_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year sign:mandatory]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9][offset_hour sign:mandatory]:[offset_minute]:[offset_second]"
);

/// Relational representation of one field.
///
/// Scalars live in `column` with no elements. Sequences store their element
/// count in `column` and the encoded elements, in order, in `elements`.
/// A NULL `column` marks an absent value for both shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredField {
    pub column: SqlValue,
    pub elements: Vec<SqlValue>,
}

pub fn encode(field: &FieldDefinition, value: &FieldValue) -> Result<StoredField, ValidationError> {
    match (value, field.sequence) {
        (FieldValue::Null, _) if !field.nullable => Err(ValidationError::MissingRequired {
            field: field.name.clone(),
        }),
        (FieldValue::Null, _) => Ok(StoredField {
            column: SqlValue::Null,
            elements: Vec::new(),
        }),
        (FieldValue::One(value), false) => Ok(StoredField {
            column: encode_value(field, value)?,
            elements: Vec::new(),
        }),
        (FieldValue::Many(values), true) => {
            let elements = values
                .iter()
                .map(|value| encode_value(field, value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StoredField {
                column: SqlValue::Integer(elements.len() as i64),
                elements,
            })
        }
        (FieldValue::One(_), true) => Err(ValidationError::ExpectedSequence {
            field: field.name.clone(),
        }),
        (FieldValue::Many(_), false) => Err(ValidationError::UnexpectedSequence {
            field: field.name.clone(),
        }),
    }
}

/// Encodes one value (a scalar or a single sequence element).
pub fn encode_value(field: &FieldDefinition, value: &Value) -> Result<SqlValue, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        field: field.name.clone(),
        expected: field.field_type.label(),
        found: value.kind(),
    };
    let out_of_range = |message: String| ValidationError::OutOfRange {
        field: field.name.clone(),
        message,
    };

    let stored = match (&field.field_type, value) {
        (FieldType::Datetime, Value::Datetime(at)) => {
            SqlValue::Text(format_datetime(*at).map_err(|err| out_of_range(err.to_string()))?)
        }
        (FieldType::Date, Value::Date(day)) => SqlValue::Text(
            day.format(DATE_FORMAT)
                .map_err(|err| out_of_range(err.to_string()))?,
        ),
        (FieldType::Integer, Value::Integer(number)) => SqlValue::Integer(*number),
        (FieldType::String, Value::String(text)) => SqlValue::Text(text.clone()),
        (FieldType::Bytes, Value::Bytes(bytes)) => SqlValue::Blob(bytes.clone()),
        (FieldType::Boolean, Value::Boolean(flag)) => SqlValue::Integer(i64::from(*flag)),
        (FieldType::TimeDelta, Value::TimeDelta(delta)) => {
            let nanos = i64::try_from(delta.whole_nanoseconds())
                .map_err(|_| out_of_range("time delta exceeds i64 nanoseconds".to_string()))?;
            SqlValue::Integer(nanos)
        }
        (FieldType::Float, Value::Float(number)) => {
            if number.is_nan() {
                return Err(ValidationError::NotANumber {
                    field: field.name.clone(),
                });
            }
            SqlValue::Real(*number)
        }
        (FieldType::Blob, Value::Blob(hash)) => SqlValue::Text(hash.as_str().to_string()),
        (FieldType::Enum(definition), Value::Enum(member)) => {
            if !definition.contains(member) {
                return Err(ValidationError::UnknownEnumMember {
                    field: field.name.clone(),
                    member: member.clone(),
                });
            }
            SqlValue::Text(member.clone())
        }
        (FieldType::Reference { .. }, Value::Reference(id)) => SqlValue::Text(id.to_string()),
        _ => return Err(mismatch()),
    };
    Ok(stored)
}

pub fn decode(
    field: &FieldDefinition,
    column: SqlValue,
    elements: Vec<SqlValue>,
) -> Result<FieldValue, CodecError> {
    if matches!(column, SqlValue::Null) {
        if !field.nullable {
            return Err(CodecError::UnexpectedNull {
                field: field.name.clone(),
            });
        }
        return Ok(FieldValue::Null);
    }

    if !field.sequence {
        return Ok(FieldValue::One(decode_value(field, column)?));
    }

    let declared = match column {
        SqlValue::Integer(count) => count,
        other => {
            return Err(CodecError::Unrecognized {
                field: field.name.clone(),
                expected: "element count",
                found: sql_kind(&other),
            })
        }
    };
    if declared < 0 || declared as usize != elements.len() {
        return Err(CodecError::SequenceLength {
            field: field.name.clone(),
            declared,
            found: elements.len(),
        });
    }
    let values = elements
        .into_iter()
        .map(|element| decode_value(field, element))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FieldValue::Many(values))
}

/// Decodes one stored value (a scalar column or a sequence element).
pub fn decode_value(field: &FieldDefinition, stored: SqlValue) -> Result<Value, CodecError> {
    let unrecognized = |expected: &'static str, stored: &SqlValue| CodecError::Unrecognized {
        field: field.name.clone(),
        expected,
        found: sql_kind(stored),
    };
    let malformed = |message: String| CodecError::Malformed {
        field: field.name.clone(),
        message,
    };

    match (&field.field_type, stored) {
        (FieldType::Datetime, SqlValue::Text(text)) => parse_datetime(&text)
            .map(Value::Datetime)
            .map_err(|err| malformed(err.to_string())),
        (FieldType::Date, SqlValue::Text(text)) => Date::parse(&text, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|err| malformed(err.to_string())),
        (FieldType::Integer, SqlValue::Integer(number)) => Ok(Value::Integer(number)),
        (FieldType::String, SqlValue::Text(text)) => Ok(Value::String(text)),
        (FieldType::Bytes, SqlValue::Blob(bytes)) => Ok(Value::Bytes(bytes)),
        (FieldType::Boolean, SqlValue::Integer(flag)) => match flag {
            0 => Ok(Value::Boolean(false)),
            1 => Ok(Value::Boolean(true)),
            other => Err(malformed(format!("boolean stored as {other}"))),
        },
        (FieldType::TimeDelta, SqlValue::Integer(nanos)) => {
            Ok(Value::TimeDelta(Duration::nanoseconds(nanos)))
        }
        (FieldType::Float, SqlValue::Real(number)) => Ok(Value::Float(number)),
        (FieldType::Blob, SqlValue::Text(text)) => BlobHash::parse(&text)
            .map(Value::Blob)
            .ok_or_else(|| malformed(format!("`{text}` is not a content hash"))),
        (FieldType::Enum(definition), SqlValue::Text(member)) => {
            if definition.contains(&member) {
                Ok(Value::Enum(member))
            } else {
                Err(malformed(format!(
                    "`{member}` is not a member of enum `{}`",
                    definition.name
                )))
            }
        }
        (FieldType::Reference { .. }, SqlValue::Text(text)) => Uuid::parse_str(&text)
            .map(Value::Reference)
            .map_err(|err| malformed(err.to_string())),
        (field_type, other) => Err(unrecognized(storage_kind_for(field_type), &other)),
    }
}

/// Row timestamps (`created_at`, `updated_at`) share the datetime text layout.
pub fn encode_timestamp(at: OffsetDateTime) -> Result<String, CodecError> {
    format_datetime(at).map_err(|err| CodecError::Malformed {
        field: "timestamp".to_string(),
        message: err.to_string(),
    })
}

pub fn decode_timestamp(text: &str) -> Result<OffsetDateTime, CodecError> {
    parse_datetime(text).map_err(|err| CodecError::Malformed {
        field: "timestamp".to_string(),
        message: err.to_string(),
    })
}

fn format_datetime(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.format(DATETIME_FORMAT)
}

/// Accepts RFC 3339 text as written by earlier versions of the store.
fn parse_datetime(text: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(text, DATETIME_FORMAT).or_else(|err| {
        OffsetDateTime::parse(text, &Rfc3339).map_err(|_| err)
    })
}

fn storage_kind_for(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::Integer | FieldType::Boolean | FieldType::TimeDelta => "integer",
        FieldType::Float => "real",
        FieldType::Bytes => "blob",
        FieldType::Datetime
        | FieldType::Date
        | FieldType::String
        | FieldType::Blob
        | FieldType::Enum(_)
        | FieldType::Reference { .. } => "text",
    }
}

fn sql_kind(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "null",
        SqlValue::Integer(_) => "integer",
        SqlValue::Real(_) => "real",
        SqlValue::Text(_) => "text",
        SqlValue::Blob(_) => "blob",
    }
}

//! Field predicates compiled to parameterized SQL.

use crate::codec::encode_value;
use crate::error::StoreResult;
use crate::model::{FieldDefinition, FieldType, ValidationError, Value};
use crate::schema::RegisteredModel;
use rusqlite::types::Value as SqlValue;

/// One comparison on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { field: String, value: Value },
    /// SQLite GLOB on a scalar string field (`*`, `?`, `[...]`).
    Glob { field: String, pattern: String },
    OneOf { field: String, values: Vec<Value> },
    /// A sequence field holds `value` among its elements.
    Contains { field: String, value: Value },
    IsNull { field: String },
    NotNull { field: String },
}

/// Conjunction of conditions; empty matches every item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn glob(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.conditions.push(Condition::Glob {
            field: field.into(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn one_of<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::OneOf {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Contains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_null(mut self, field: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNull {
            field: field.into(),
        });
        self
    }

    pub fn not_null(mut self, field: impl Into<String>) -> Self {
        self.conditions.push(Condition::NotNull {
            field: field.into(),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

/// SQL fragment over the main table aliased `t`, plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledPredicate {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

pub(crate) fn compile(model: &RegisteredModel, predicate: &Predicate) -> StoreResult<CompiledPredicate> {
    let mut clauses = Vec::with_capacity(predicate.conditions.len());
    let mut params = Vec::new();

    for condition in &predicate.conditions {
        let clause = match condition {
            Condition::Equals { field, value } => {
                let def = scalar_field(model, field)?;
                params.push(encode_value(def, value)?);
                format!("t.\"{}\" = ?", model.column(field))
            }
            Condition::Glob { field, pattern } => {
                let def = scalar_field(model, field)?;
                if def.field_type != FieldType::String {
                    return Err(unsupported(field, "glob applies to string fields").into());
                }
                params.push(SqlValue::Text(pattern.clone()));
                format!("t.\"{}\" GLOB ?", model.column(field))
            }
            Condition::OneOf { field, values } => {
                let def = scalar_field(model, field)?;
                if values.is_empty() {
                    "0".to_string()
                } else {
                    for value in values {
                        params.push(encode_value(def, value)?);
                    }
                    let slots = vec!["?"; values.len()].join(", ");
                    format!("t.\"{}\" IN ({slots})", model.column(field))
                }
            }
            Condition::Contains { field, value } => {
                let def = known_field(model, field)?;
                if !def.sequence {
                    return Err(unsupported(field, "contains applies to sequence fields").into());
                }
                params.push(encode_value(def, value)?);
                format!(
                    "EXISTS (SELECT 1 FROM \"{}\" s WHERE s.item_id = t.id AND s.value = ?)",
                    model.sequence_table(field)
                )
            }
            Condition::IsNull { field } => {
                known_field(model, field)?;
                format!("t.\"{}\" IS NULL", model.column(field))
            }
            Condition::NotNull { field } => {
                known_field(model, field)?;
                format!("t.\"{}\" IS NOT NULL", model.column(field))
            }
        };
        clauses.push(clause);
    }

    let sql = if clauses.is_empty() {
        "1".to_string()
    } else {
        clauses.join(" AND ")
    };
    Ok(CompiledPredicate { sql, params })
}

fn known_field<'m>(model: &'m RegisteredModel, field: &str) -> Result<&'m FieldDefinition, ValidationError> {
    model.field(field).ok_or_else(|| ValidationError::UnknownField {
        model: model.name().to_string(),
        field: field.to_string(),
    })
}

fn scalar_field<'m>(model: &'m RegisteredModel, field: &str) -> Result<&'m FieldDefinition, ValidationError> {
    let def = known_field(model, field)?;
    if def.sequence {
        return Err(unsupported(field, "use `contains` for sequence fields"));
    }
    Ok(def)
}

fn unsupported(field: &str, reason: &'static str) -> ValidationError {
    ValidationError::UnsupportedPredicate {
        field: field.to_string(),
        reason,
    }
}

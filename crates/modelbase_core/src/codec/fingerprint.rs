use super::StoredField;
use crate::model::ModelDefinition;
use rusqlite::types::Value as SqlValue;
use sha2::{Digest, Sha256};

/// SHA-256 over the encoded dedup-significant fields, in definition order.
///
/// `encoded` pairs each field name with its stored form; fields excluded from
/// dedup are skipped. Every part is tagged and length-prefixed so distinct
/// contents never share a byte stream.
pub fn fingerprint(definition: &ModelDefinition, encoded: &[(&str, &StoredField)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(definition.name.as_bytes());
    hasher.update([0]);

    for field in definition.fields.iter().filter(|field| field.dedup) {
        let stored = encoded
            .iter()
            .find(|(name, _)| *name == field.name)
            .map(|(_, stored)| *stored);
        write_len_prefixed(&mut hasher, field.name.as_bytes());
        match stored {
            Some(stored) => {
                write_value(&mut hasher, &stored.column);
                hasher.update((stored.elements.len() as u64).to_be_bytes());
                for element in &stored.elements {
                    write_value(&mut hasher, element);
                }
            }
            None => write_value(&mut hasher, &SqlValue::Null),
        }
    }

    hex::encode(hasher.finalize())
}

fn write_value(hasher: &mut Sha256, value: &SqlValue) {
    match value {
        SqlValue::Null => hasher.update([0]),
        SqlValue::Integer(number) => {
            hasher.update([1]);
            hasher.update(number.to_be_bytes());
        }
        SqlValue::Real(number) => {
            hasher.update([2]);
            hasher.update(number.to_bits().to_be_bytes());
        }
        SqlValue::Text(text) => {
            hasher.update([3]);
            write_len_prefixed(hasher, text.as_bytes());
        }
        SqlValue::Blob(bytes) => {
            hasher.update([4]);
            write_len_prefixed(hasher, bytes);
        }
    }
}

fn write_len_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::fingerprint;
    use crate::codec::StoredField;
    use crate::model::{FieldDefinition, FieldType, ModelDefinition};
    use rusqlite::types::Value as SqlValue;

    fn scalar(value: SqlValue) -> StoredField {
        StoredField {
            column: value,
            elements: Vec::new(),
        }
    }

    fn definition() -> ModelDefinition {
        ModelDefinition::new("file", 1)
            .field(FieldDefinition::new("name", FieldType::String))
            .field(FieldDefinition::new("seen", FieldType::Integer).excluded_from_dedup())
    }

    #[test]
    fn excluded_fields_do_not_change_fingerprint() {
        let name = scalar(SqlValue::Text("a".to_string()));
        let first = fingerprint(
            &definition(),
            &[("name", &name), ("seen", &scalar(SqlValue::Integer(1)))],
        );
        let second = fingerprint(
            &definition(),
            &[("name", &name), ("seen", &scalar(SqlValue::Integer(2)))],
        );
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn null_empty_and_text_are_distinct() {
        let def = definition();
        let null = fingerprint(&def, &[("name", &scalar(SqlValue::Null))]);
        let empty = fingerprint(&def, &[("name", &scalar(SqlValue::Text(String::new())))]);
        let blob = fingerprint(&def, &[("name", &scalar(SqlValue::Blob(Vec::new())))]);
        assert_ne!(null, empty);
        assert_ne!(empty, blob);
    }
}

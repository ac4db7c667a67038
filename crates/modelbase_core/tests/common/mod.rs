#![allow(dead_code)]

use modelbase_core::{
    FieldDefinition, FieldType, FieldValues, ModelDefinition, Store, StoreConfig, Value,
};

pub fn store() -> Store {
    Store::open_in_memory(StoreConfig::default()).unwrap()
}

pub fn store_with(config: StoreConfig) -> Store {
    Store::open_in_memory(config).unwrap()
}

/// `file(name: string!, size: integer, payload: blob)` with the given dedup flags.
pub fn file_model(implicit_dedup: bool, fail_on_dup: bool) -> ModelDefinition {
    ModelDefinition::new("file", 1)
        .describe("a stored file")
        .field(FieldDefinition::new("name", FieldType::String).required())
        .field(FieldDefinition::new("size", FieldType::Integer))
        .field(FieldDefinition::new("payload", FieldType::Blob))
        .implicit_dedup(implicit_dedup)
        .fail_on_dup(fail_on_dup)
}

pub fn file_values(name: &str, payload: &[u8]) -> FieldValues {
    FieldValues::new()
        .with("name", name)
        .with("size", payload.len() as i64)
        .with("payload", Value::Bytes(payload.to_vec()))
}

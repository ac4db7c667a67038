mod common;

use common::{file_model, file_values, store};
use modelbase_core::{
    ErrorKind, FieldDefinition, FieldType, FieldValues, ModelDefinition, Predicate, StoreError,
    Value,
};

#[test]
fn plain_models_create_a_new_identity_per_insert() {
    let mut store = store();
    let model = store.register(file_model(false, false)).unwrap();
    let first = store.insert(&model, file_values("a", b"same")).unwrap();
    let second = store.insert(&model, file_values("a", b"same")).unwrap();
    assert_ne!(first, second);
    assert_eq!(store.count(&model, &Predicate::all()).unwrap(), 2);
    assert_eq!(store.blob_count().unwrap(), 1);
}

#[test]
fn implicit_dedup_returns_the_existing_identity() {
    let mut store = store();
    let model = store.register(file_model(true, false)).unwrap();
    let first = store.insert(&model, file_values("a", b"same")).unwrap();
    let again = store.insert(&model, file_values("a", b"same")).unwrap();
    let other = store.insert(&model, file_values("a", b"different")).unwrap();

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(store.count(&model, &Predicate::all()).unwrap(), 2);
}

#[test]
fn fail_on_dup_rejects_matching_content() {
    let mut store = store();
    let model = store.register(file_model(false, true)).unwrap();
    let first = store.insert(&model, file_values("a", b"same")).unwrap();

    let err = store.insert(&model, file_values("a", b"same")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateError);
    assert!(matches!(err, StoreError::Duplicate { existing, .. } if existing == first));

    let err = store
        .insert_derived(&model, file_values("a", b"same"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateError);
    assert_eq!(store.count(&model, &Predicate::all()).unwrap(), 1);
}

#[test]
fn combined_flags_reject_callers_but_reuse_for_derived_inserts() {
    let mut store = store();
    let model = store.register(file_model(true, true)).unwrap();
    let first = store.insert(&model, file_values("a", b"same")).unwrap();

    let err = store.insert(&model, file_values("a", b"same")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateError);

    let derived = store
        .insert_derived(&model, file_values("a", b"same"))
        .unwrap();
    assert_eq!(derived, first);
    assert_eq!(store.count(&model, &Predicate::all()).unwrap(), 1);
}

#[test]
fn blob_fields_compare_by_content_hash() {
    let mut store = store();
    let model = store.register(file_model(true, false)).unwrap();
    let handle = store.put_blob_bytes(b"payload").unwrap();

    let by_bytes = store.insert(&model, file_values("a", b"payload")).unwrap();
    let by_hash = store
        .insert(
            &model,
            FieldValues::new()
                .with("name", "a")
                .with("size", 7_i64)
                .with("payload", handle.hash),
        )
        .unwrap();
    assert_eq!(by_bytes, by_hash);
}

#[test]
fn excluded_fields_do_not_affect_identity() {
    let mut store = store();
    let model = store
        .register(
            ModelDefinition::new("observation", 1)
                .field(FieldDefinition::new("subject", FieldType::String).required())
                .field(FieldDefinition::new("seen_at", FieldType::Integer).excluded_from_dedup())
                .implicit_dedup(true),
        )
        .unwrap();

    let first = store
        .insert(
            &model,
            FieldValues::new().with("subject", "x").with("seen_at", 1_i64),
        )
        .unwrap();
    let second = store
        .insert(
            &model,
            FieldValues::new().with("subject", "x").with("seen_at", 2_i64),
        )
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(store.get(&model, first).unwrap().integer("seen_at"), Some(1));
}

#[test]
fn sequence_order_is_part_of_identity() {
    let mut store = store();
    let model = store
        .register(
            ModelDefinition::new("path", 1)
                .field(FieldDefinition::new("parts", FieldType::String).sequence())
                .implicit_dedup(true),
        )
        .unwrap();
    let ab = store
        .insert(&model, FieldValues::new().with("parts", vec![Value::from("a"), Value::from("b")]))
        .unwrap();
    let ba = store
        .insert(&model, FieldValues::new().with("parts", vec![Value::from("b"), Value::from("a")]))
        .unwrap();
    let empty = store
        .insert(&model, FieldValues::new().with("parts", Vec::<Value>::new()))
        .unwrap();
    let absent = store.insert(&model, FieldValues::new()).unwrap();

    assert_ne!(ab, ba);
    assert_ne!(empty, absent);
    assert_eq!(store.count(&model, &Predicate::all()).unwrap(), 4);
}

#[test]
fn updates_refresh_the_identity_fingerprint() {
    let mut store = store();
    let model = store.register(file_model(true, false)).unwrap();
    let id = store.insert(&model, file_values("a", b"one")).unwrap();
    store
        .update(&model, id, FieldValues::new().with("name", "b"))
        .unwrap();

    let matching_new = store
        .insert(
            &model,
            FieldValues::new()
                .with("name", "b")
                .with("size", 3_i64)
                .with("payload", Value::Bytes(b"one".to_vec())),
        )
        .unwrap();
    assert_eq!(matching_new, id);

    let matching_old = store.insert(&model, file_values("a", b"one")).unwrap();
    assert_ne!(matching_old, id);
}

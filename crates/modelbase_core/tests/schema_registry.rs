mod common;

use common::{file_model, store};
use modelbase_core::schema::table_name_for;
use modelbase_core::{
    EnumDefinition, ErrorKind, FieldDefinition, FieldType, ModelDefinition, SchemaError,
    StoreError,
};

fn schema_error(err: StoreError) -> SchemaError {
    match err {
        StoreError::Schema(inner) => inner,
        other => panic!("expected schema error, got {other}"),
    }
}

#[test]
fn registering_identical_definition_is_idempotent() {
    let mut store = store();
    let first = store.register(file_model(true, false)).unwrap();
    let second = store.register(file_model(true, false)).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.models().count(), 1);
}

#[test]
fn lookup_of_unknown_model_is_not_found() {
    let store = store();
    let err = store.lookup("missing").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn duplicate_field_names_are_rejected() {
    let mut store = store();
    let definition = ModelDefinition::new("dup", 1)
        .field(FieldDefinition::new("a", FieldType::Integer))
        .field(FieldDefinition::new("a", FieldType::String));
    let err = schema_error(store.register(definition).unwrap_err());
    assert!(matches!(err, SchemaError::DuplicateField { .. }));
}

#[test]
fn malformed_names_and_enums_are_rejected() {
    let mut store = store();
    let bad_model = ModelDefinition::new("9lives", 1).field(FieldDefinition::new("a", FieldType::Integer));
    assert!(matches!(
        schema_error(store.register(bad_model).unwrap_err()),
        SchemaError::InvalidModelName(_)
    ));

    let bad_field = ModelDefinition::new("ok", 1).field(FieldDefinition::new("has space", FieldType::Integer));
    assert!(matches!(
        schema_error(store.register(bad_field).unwrap_err()),
        SchemaError::InvalidFieldName { .. }
    ));

    let repeated = EnumDefinition::new("color", ["red", "red"]);
    let bad_enum = ModelDefinition::new("ok", 1).field(FieldDefinition::new("c", FieldType::Enum(repeated)));
    assert!(matches!(
        schema_error(store.register(bad_enum).unwrap_err()),
        SchemaError::InvalidEnum { .. }
    ));

    let no_fields = ModelDefinition::new("empty", 1);
    assert!(matches!(
        schema_error(store.register(no_fields).unwrap_err()),
        SchemaError::NoFields(_)
    ));
}

#[test]
fn references_need_a_known_target() {
    let mut store = store();
    let dangling = ModelDefinition::new("link", 1).field(FieldDefinition::new(
        "target",
        FieldType::Reference {
            model: "file".to_string(),
        },
    ));
    assert!(matches!(
        schema_error(store.register(dangling.clone()).unwrap_err()),
        SchemaError::UnknownReferenceTarget { .. }
    ));

    store.register(file_model(false, false)).unwrap();
    store.register(dangling).unwrap();

    let self_reference = ModelDefinition::new("node", 1).field(FieldDefinition::new(
        "parent",
        FieldType::Reference {
            model: "node".to_string(),
        },
    ));
    store.register(self_reference).unwrap();
}

#[test]
fn version_rules_follow_registered_definition() {
    let mut store = store();
    store.register(file_model(true, false)).unwrap();

    let mut older = file_model(true, false);
    older.version = 0;
    assert!(matches!(
        schema_error(store.register(older).unwrap_err()),
        SchemaError::VersionRegression { .. }
    ));

    let changed_same_version = file_model(true, false).field(FieldDefinition::new("extra", FieldType::Boolean));
    assert!(matches!(
        schema_error(store.register(changed_same_version).unwrap_err()),
        SchemaError::IncompatibleRedefinition { .. }
    ));

    let mut changed_newer = file_model(true, false).field(FieldDefinition::new("extra", FieldType::Boolean));
    changed_newer.version = 2;
    assert!(matches!(
        schema_error(store.register(changed_newer).unwrap_err()),
        SchemaError::IncompatibleRedefinition { .. }
    ));

    let mut same_shape_newer = file_model(true, false).describe("now documented");
    same_shape_newer.version = 3;
    let bumped = store.register(same_shape_newer).unwrap();
    assert_eq!(bumped.version(), 3);
    assert_eq!(store.lookup("file").unwrap().version(), 3);
}

#[test]
fn sanitized_table_collisions_are_rejected() {
    let mut store = store();
    assert_eq!(table_name_for("pkg.file"), "m_pkg_file");
    assert_eq!(table_name_for("pkg-file"), "m_pkg_file");

    store
        .register(ModelDefinition::new("pkg.file", 1).field(FieldDefinition::new("a", FieldType::Integer)))
        .unwrap();
    let err = store
        .register(ModelDefinition::new("pkg-file", 1).field(FieldDefinition::new("a", FieldType::Integer)))
        .unwrap_err();
    assert!(matches!(schema_error(err), SchemaError::TableNameCollision { .. }));
}

#[test]
fn registered_definition_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.db");
    let colors = EnumDefinition::new("color", ["red", "green"]);
    let definition = ModelDefinition::new("paint", 4)
        .field(FieldDefinition::new("color", FieldType::Enum(colors)).required())
        .field(FieldDefinition::new("tags", FieldType::String).sequence())
        .field(FieldDefinition::new("seen", FieldType::Datetime).excluded_from_dedup())
        .implicit_dedup(true);

    {
        let mut store = modelbase_core::Store::open(&path, Default::default()).unwrap();
        store.register(definition.clone()).unwrap();
    }
    let store = modelbase_core::Store::open(&path, Default::default()).unwrap();
    assert_eq!(store.lookup("paint").unwrap().definition(), &definition);
}

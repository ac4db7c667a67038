mod common;

use common::{file_model, file_values};
use modelbase_core::{
    FieldDefinition, FieldType, FieldValues, ModelDefinition, Pipeline, Predicate, SearchQuery,
    Store, StoreConfig, Transform, TransformFailure, TransformInput, TransformOutput,
};
use std::io::Read;

#[test]
fn identical_content_is_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut store = Store::open(&path, StoreConfig::default()).unwrap();
    let model = store.register(file_model(true, false)).unwrap();

    let first = store.insert(&model, file_values("a.bin", b"same bytes")).unwrap();
    let second = store.insert(&model, file_values("a.bin", b"same bytes")).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.count(&model, &Predicate::all()).unwrap(), 1);

    store
        .insert(&model, file_values("a.bin", b"other bytes"))
        .unwrap();
    assert_eq!(store.count(&model, &Predicate::all()).unwrap(), 2);
    assert_eq!(store.blob_count().unwrap(), 2);
}

/// Records the first line of each file as a `heading` item.
struct Headings;

impl Transform for Headings {
    fn name(&self) -> &str {
        "headings"
    }

    fn source_model(&self) -> &str {
        "file"
    }

    fn payload_field(&self) -> Option<&str> {
        Some("payload")
    }

    fn transform(&self, mut input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
        let body = input.read_payload()?;
        let text = String::from_utf8_lossy(&body);
        Ok(match text.lines().next().filter(|line| !line.is_empty()) {
            Some(line) => TransformOutput::none().insert(
                "heading",
                FieldValues::new()
                    .with("text", line)
                    .with("file", input.item.id),
            ),
            None => TransformOutput::none(),
        })
    }
}

#[test]
fn store_survives_reopen_with_pipeline_output_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let mut store = Store::open(&path, StoreConfig::default()).unwrap();
        let file = store.register(file_model(true, false)).unwrap();
        store
            .register(
                ModelDefinition::new("heading", 1)
                    .field(FieldDefinition::new("text", FieldType::String).required())
                    .field(FieldDefinition::new(
                        "file",
                        FieldType::Reference {
                            model: "file".to_string(),
                        },
                    )),
            )
            .unwrap();
        store
            .insert(&file, file_values("notes.md", b"Release checklist\n- tag\n- publish"))
            .unwrap();
        store
            .insert(&file, file_values("empty.md", b""))
            .unwrap();
        store.enable_search_index().unwrap();

        let report = store
            .run_pipeline(&Pipeline::new().stage(Headings))
            .unwrap();
        assert!(report.converged());
        assert_eq!(report.produced(), 1);
    }

    let store = Store::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(store.models().count(), 2);
    assert!(store.search_index_enabled().unwrap());

    let heading = store.lookup("heading").unwrap();
    let items = store
        .find(&heading, &Predicate::all())
        .unwrap()
        .iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].string("text"), Some("Release checklist"));

    let source = store.resolve(&items[0], "file").unwrap().unwrap();
    let mut body = String::new();
    store
        .open_blob(source.blob("payload").unwrap())
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert!(body.starts_with("Release checklist"));

    let scan = store
        .search(&SearchQuery::new("checklist"))
        .unwrap()
        .to_vec()
        .unwrap();
    let mut indexed = store
        .search(&SearchQuery::new("checklist").indexed())
        .unwrap()
        .to_vec()
        .unwrap();
    indexed.sort();
    let mut scan = scan;
    scan.sort();
    assert_eq!(scan, indexed);
    assert_eq!(scan.len(), 2);

    let rerun = store.run_pipeline(&Pipeline::new().stage(Headings)).unwrap();
    assert!(rerun.rounds.is_empty());
}

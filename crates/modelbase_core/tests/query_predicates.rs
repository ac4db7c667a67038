mod common;

use common::store_with;
use modelbase_core::{
    ErrorKind, FieldDefinition, FieldType, FieldValues, ItemId, ModelDefinition, Predicate,
    RegisteredModel, Store, StoreConfig, Value,
};

fn document_store() -> (Store, RegisteredModel, Vec<ItemId>) {
    let mut store = store_with(StoreConfig {
        page_size: 2,
        ..StoreConfig::default()
    });
    let model = store
        .register(
            ModelDefinition::new("document", 1)
                .field(FieldDefinition::new("path", FieldType::String).required())
                .field(FieldDefinition::new("pages", FieldType::Integer))
                .field(FieldDefinition::new("tags", FieldType::String).sequence()),
        )
        .unwrap();

    let rows: [(&str, Option<i64>, &[&str]); 5] = [
        ("docs/a.md", Some(1), &["draft"]),
        ("docs/b.md", Some(2), &["final", "shared"]),
        ("src/c.rs", None, &[]),
        ("docs/d.txt", Some(3), &["draft", "shared"]),
        ("notes/e.md", Some(2), &["final"]),
    ];
    let mut ids = Vec::new();
    for (path, pages, tags) in rows {
        let mut values = FieldValues::new().with("path", path).with(
            "tags",
            tags.iter().map(|tag| Value::from(*tag)).collect::<Vec<_>>(),
        );
        if let Some(pages) = pages {
            values.set("pages", pages);
        }
        ids.push(store.insert(&model, values).unwrap());
    }
    (store, model, ids)
}

fn paths(store: &Store, model: &RegisteredModel, predicate: &Predicate) -> Vec<String> {
    store
        .find(model, predicate)
        .unwrap()
        .iter()
        .map(|item| item.unwrap().string("path").unwrap().to_string())
        .collect()
}

#[test]
fn empty_predicate_walks_every_item_across_pages() {
    let (store, model, ids) = document_store();
    let selection = store.find(&model, &Predicate::all()).unwrap();
    assert_eq!(selection.count().unwrap(), 5);
    assert_eq!(selection.ids().unwrap(), ids);
}

#[test]
fn selections_restart_from_the_beginning() {
    let (store, model, _) = document_store();
    let selection = store.find(&model, &Predicate::all()).unwrap();

    let mut first = selection.iter();
    first.next().unwrap().unwrap();
    first.next().unwrap().unwrap();
    first.next().unwrap().unwrap();

    let again = selection.iter().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(again.len(), 5);
    assert_eq!(again[0].string("path"), Some("docs/a.md"));
}

#[test]
fn equality_and_membership() {
    let (store, model, _) = document_store();
    assert_eq!(
        paths(&store, &model, &Predicate::all().equals("pages", 2_i64)),
        ["docs/b.md", "notes/e.md"]
    );
    assert_eq!(
        paths(&store, &model, &Predicate::all().one_of("pages", [1_i64, 3_i64])),
        ["docs/a.md", "docs/d.txt"]
    );
    assert!(paths(&store, &model, &Predicate::all().one_of("pages", Vec::<i64>::new())).is_empty());
}

#[test]
fn glob_matches_string_fields() {
    let (store, model, _) = document_store();
    assert_eq!(
        paths(&store, &model, &Predicate::all().glob("path", "docs/*.md")),
        ["docs/a.md", "docs/b.md"]
    );
    assert_eq!(
        paths(&store, &model, &Predicate::all().glob("path", "*.[rt]*")),
        ["src/c.rs", "docs/d.txt"]
    );
}

#[test]
fn contains_looks_inside_sequences() {
    let (store, model, _) = document_store();
    assert_eq!(
        paths(&store, &model, &Predicate::all().contains("tags", "shared")),
        ["docs/b.md", "docs/d.txt"]
    );
}

#[test]
fn null_checks() {
    let (store, model, _) = document_store();
    assert_eq!(
        paths(&store, &model, &Predicate::all().is_null("pages")),
        ["src/c.rs"]
    );
    assert_eq!(
        store
            .count(&model, &Predicate::all().not_null("pages"))
            .unwrap(),
        4
    );
}

#[test]
fn conditions_are_conjunctive() {
    let (store, model, _) = document_store();
    let predicate = Predicate::all()
        .glob("path", "docs/*")
        .contains("tags", "draft")
        .equals("pages", 3_i64);
    assert_eq!(paths(&store, &model, &predicate), ["docs/d.txt"]);
}

#[test]
fn unsupported_predicates_are_validation_errors() {
    let (store, model, _) = document_store();
    let cases = [
        Predicate::all().equals("missing", "x"),
        Predicate::all().glob("pages", "1*"),
        Predicate::all().equals("tags", "draft"),
        Predicate::all().contains("path", "docs"),
        Predicate::all().equals("pages", "two"),
    ];
    for predicate in cases {
        let err = store.find(&model, &predicate).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ValidationError, "{predicate:?}");
    }
}

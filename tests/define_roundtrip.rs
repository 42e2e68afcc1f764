use std::collections::HashMap;

use metastore::datatype::Scalar;
use metastore::error::MetaStoreError;
use metastore::query::{Criteria, Select};
use metastore::store::{DefineBatch, Store};

fn setup() -> Store {
    Store::open_in_memory().unwrap()
}

fn define_fun_some(store: &Store, num: f64, string: Option<&str>) {
    store
        .define(
            "fun",
            "some",
            [
                ("num".to_owned(), Some(Scalar::from(num))),
                ("str".to_owned(), string.map(Scalar::from)),
            ],
        )
        .unwrap();
}

fn query_fun_some(store: &Store) -> Vec<Vec<Option<Scalar>>> {
    let mut query = Select::new("fun");
    query.select = vec!["value".to_owned(), "num".to_owned(), "str".to_owned()];
    query.add_where_group(vec![Criteria::new("value", "=", "@k")]);
    query.add_param("@k", "some");
    store.select(&query).unwrap()
}

#[test]
fn define_then_query_one_row() {
    let store = setup();
    define_fun_some(&store, 42.0, Some("foobar"));

    let rows = query_fun_some(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Some(Scalar::from("some")));
    assert_eq!(rows[0][1], Some(Scalar::from(42.0)));
    assert_eq!(rows[0][2], Some(Scalar::from("foobar")));
}

#[test]
fn redefine_upserts_and_null_erases() {
    let store = setup();
    define_fun_some(&store, 42.0, Some("foobar"));
    define_fun_some(&store, 43.0, None);

    let rows = query_fun_some(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], Some(Scalar::from(43.0)));
    assert_eq!(rows[0][2], None);

    // The erased attribute is gone from the metadata dictionary entirely.
    let got = store.get("fun", &[Scalar::from("some")]).unwrap();
    let metadata = got[0].as_ref().unwrap();
    assert_eq!(metadata.get("num"), Some(&Scalar::from(43.0)));
    assert!(!metadata.contains_key("str"));
}

#[test]
fn get_reports_missing_keys_in_order() {
    let store = setup();
    define_fun_some(&store, 42.0, Some("foobar"));

    let got = store
        .get("fun", &[Scalar::from("nope"), Scalar::from("some")])
        .unwrap();
    assert_eq!(got.len(), 2);
    assert!(got[0].is_none());
    assert!(got[1].is_some());

    // A table nobody ever defined into is a hard error for Get.
    assert!(matches!(
        store.get("never", &[Scalar::from("k")]),
        Err(MetaStoreError::NotFound { .. })
    ));
}

#[test]
fn multi_define_covers_many_keys_in_one_call() {
    let store = setup();
    let mut batch = DefineBatch::new("planets");
    for (name, orbit) in [("mercury", 88.0), ("venus", 225.0), ("earth", 365.0)] {
        batch.set(name, "orbit_days", Some(Scalar::from(orbit))).unwrap();
        batch.set(name, "kind", Some(Scalar::from("rocky"))).unwrap();
    }
    store.multi_define(&batch).unwrap();

    let mut query = Select::new("planets");
    query.select = vec!["value".to_owned(), "orbit_days".to_owned()];
    query.add_where_group(vec![Criteria::new("orbit_days", ">", "@days")]);
    query.add_param("@days", 100.0);
    query.add_order("orbit_days", false);
    let rows = store.select(&query).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], Some(Scalar::from("venus")));
    assert_eq!(rows[1][0], Some(Scalar::from("earth")));
}

#[test]
fn repeated_keys_in_a_batch_share_one_item() {
    let store = setup();
    let mut batch = DefineBatch::new("fun");
    batch.set("some", "a", Some(Scalar::from(1.0))).unwrap();
    batch.set("some", "b", Some(Scalar::from(2.0))).unwrap();
    batch.set("some", "a", Some(Scalar::from(3.0))).unwrap();
    store.multi_define(&batch).unwrap();

    let mut query = Select::new("fun");
    query.select = vec!["id".to_owned(), "a".to_owned(), "b".to_owned()];
    let rows = store.select(&query).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], Some(Scalar::from(3.0)));
    assert_eq!(rows[0][2], Some(Scalar::from(2.0)));
}

#[test]
fn numeric_keys_round_trip() {
    let store = setup();
    store
        .define(
            "readings",
            1001,
            [("celsius".to_owned(), Some(Scalar::from(21.5)))],
        )
        .unwrap();

    let got = store.get("readings", &[Scalar::from(1001)]).unwrap();
    let metadata = got[0].as_ref().unwrap();
    assert_eq!(metadata.get("celsius"), Some(&Scalar::from(21.5)));

    let id = store.row_id("readings", &Scalar::from(1001)).unwrap();
    assert!(id.is_some());
    let key = store.row_value("readings", id.unwrap()).unwrap();
    assert_eq!(key, Some(Scalar::from(1001.0)));
}

#[test]
fn query_get_returns_full_metadata_with_pseudo_columns() {
    let store = setup();
    define_fun_some(&store, 42.0, Some("foobar"));

    let mut request = Select::new("fun");
    request.add_where_group(vec![Criteria::new("value", "=", "@k")]);
    request.add_param("@k", "some");
    let responses = store.query_get(&request).unwrap();
    assert_eq!(responses.len(), 1);
    let metadata = &responses[0];
    assert_eq!(metadata.get("value"), Some(&Scalar::from("some")));
    assert_eq!(metadata.get("num"), Some(&Scalar::from(42.0)));
    assert_eq!(metadata.get("str"), Some(&Scalar::from("foobar")));
    assert!(metadata.contains_key("id"));
}

#[test]
fn delete_removes_items_and_their_metadata() {
    let store = setup();
    define_fun_some(&store, 42.0, Some("foobar"));
    store.delete("fun", &[Scalar::from("some")]).unwrap();

    assert!(query_fun_some(&store).is_empty());
    let got = store.get("fun", &[Scalar::from("some")]).unwrap();
    assert!(got[0].is_none());

    // Unknown tables and keys are quiet no-ops.
    store.delete("fun", &[Scalar::from("some")]).unwrap();
    store.delete("never", &[Scalar::from("x")]).unwrap();
}

#[test]
fn interning_shares_ids_between_keys_and_values() {
    let store = setup();
    // "shared" appears both as a key and as a metadata value.
    store
        .define(
            "tags",
            "shared",
            [("label".to_owned(), Some(Scalar::from("shared")))],
        )
        .unwrap();
    let first = store.value_id(&Scalar::from("shared")).unwrap();
    let second = store.value_id(&Scalar::from("shared")).unwrap();
    assert_eq!(first, second);

    // Equal numbers intern to the same id regardless of spelling.
    let a = store.value_id(&Scalar::from(7)).unwrap();
    let b = store.value_id(&Scalar::from(7.0)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn failed_define_leaves_no_partial_writes() {
    let store = setup();
    define_fun_some(&store, 42.0, Some("foobar"));

    // Second key's numeric-ness conflicts with the table; the whole batch
    // must be rejected with nothing written.
    let mut batch = DefineBatch::new("fun");
    batch.set("another", "num", Some(Scalar::from(1.0))).unwrap();
    batch.set(5, "num", Some(Scalar::from(2.0))).unwrap();
    let result = store.multi_define(&batch);
    assert!(matches!(
        result,
        Err(MetaStoreError::TableTypeMismatch { .. })
    ));

    let got = store.get("fun", &[Scalar::from("another")]).unwrap();
    assert!(got[0].is_none());
}

#[test]
fn metadata_values_translates_bulk_triples() {
    let store = setup();
    define_fun_some(&store, 42.0, Some("foobar"));
    let id = store.row_id("fun", &Scalar::from("some")).unwrap().unwrap();
    let triples: HashMap<i64, i64> = store.item_data(id).unwrap();
    assert_eq!(triples.len(), 2);
    let metadata = store.metadata_values(&triples).unwrap();
    assert_eq!(metadata.get("num"), Some(&Scalar::from(42.0)));
    assert_eq!(metadata.get("str"), Some(&Scalar::from("foobar")));
}

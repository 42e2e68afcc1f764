use metastore::datatype::Scalar;
use metastore::query::Select;
use metastore::store::Store;

fn seeded() -> Store {
    let store = Store::open_in_memory().unwrap();
    store
        .define(
            "fun",
            "some",
            [
                ("num".to_owned(), Some(Scalar::from(42))),
                ("str".to_owned(), Some(Scalar::from("foobar"))),
            ],
        )
        .unwrap();
    store
        .define(
            "other",
            "thing",
            [("weight".to_owned(), Some(Scalar::from(3.5)))],
        )
        .unwrap();
    store
}

fn count_rows(store: &Store, table: &str) -> usize {
    let mut query = Select::new(table);
    query.select = vec!["value".to_owned()];
    store.select(&query).unwrap().len()
}

#[test]
fn schema_lists_tables_and_their_attributes() {
    let store = seeded();
    let schema = store.schema(None).unwrap();
    assert_eq!(
        schema,
        vec![
            ("fun".to_owned(), vec!["num".to_owned(), "str".to_owned()]),
            ("other".to_owned(), vec!["weight".to_owned()]),
        ]
    );

    let just_fun = store.schema(Some("fun")).unwrap();
    assert_eq!(just_fun.len(), 1);
    assert_eq!(just_fun[0].0, "fun");
}

#[test]
fn drop_table_removes_only_that_table() {
    let store = seeded();
    store
        .put_long_value("fun", &Scalar::from("some"), "blurb", "long text here")
        .unwrap();
    store.drop_table("fun").unwrap();

    assert_eq!(count_rows(&store, "fun"), 0);
    assert_eq!(count_rows(&store, "other"), 1);
    let schema = store.schema(None).unwrap();
    assert_eq!(schema.len(), 1);
    assert_eq!(schema[0].0, "other");
    assert_eq!(
        store
            .get_long_value("fun", &Scalar::from("some"), "blurb", None)
            .unwrap(),
        None
    );

    // Dropping a table that does not exist is a no-op.
    store.drop_table("fun").unwrap();
}

#[test]
fn dropped_table_can_change_its_key_type() {
    let store = seeded();
    store.drop_table("fun").unwrap();
    // The registry entry is gone, so the table can be recreated numeric.
    store
        .define("fun", 1, [("num".to_owned(), Some(Scalar::from(1)))])
        .unwrap();
    let got = store.get("fun", &[Scalar::from(1)]).unwrap();
    assert!(got[0].is_some());
}

#[test]
fn reset_clears_items_but_keeps_registries() {
    let store = seeded();
    store.reset(false).unwrap();
    assert_eq!(count_rows(&store, "fun"), 0);
    // Tables and names survive a shallow reset.
    assert_eq!(store.schema(None).unwrap().len(), 2);
}

#[test]
fn full_reset_clears_registries_too() {
    let store = seeded();
    store.reset(true).unwrap();
    assert!(store.schema(None).unwrap().is_empty());
    assert_eq!(count_rows(&store, "fun"), 0);
}

#[test]
fn create_table_registers_without_items() {
    let store = Store::open_in_memory().unwrap();
    store.create_table("empty", false).unwrap();
    assert_eq!(count_rows(&store, "empty"), 0);
    // Created ahead of time means the key type is already fixed.
    let result = store.define("empty", 1, [("a".to_owned(), Some(Scalar::from(1)))]);
    assert!(result.is_err());
}

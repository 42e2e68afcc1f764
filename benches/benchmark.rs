use criterion::{black_box, criterion_group, criterion_main, Criterion};

use metastore::datatype::Scalar;
use metastore::query::{Criteria, Select};
use metastore::store::{DefineBatch, Store};

fn seeded_store(items: usize) -> Store {
    let store = Store::open_in_memory().unwrap();
    let mut batch = DefineBatch::new("bench");
    for i in 0..items {
        let key = format!("key{}", i);
        batch
            .set(key.as_str(), "n", Some(Scalar::from(i as f64)))
            .unwrap();
        batch
            .set(key.as_str(), "label", Some(Scalar::from("fixed")))
            .unwrap();
    }
    store.multi_define(&batch).unwrap();
    store
}

fn bench_define(c: &mut Criterion) {
    c.bench_function("define single key", |b| {
        let store = Store::open_in_memory().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("key{}", i);
            store
                .define(
                    "bench",
                    key.as_str(),
                    [("n".to_owned(), Some(Scalar::from(i as f64)))],
                )
                .unwrap();
        });
    });

    c.bench_function("multi define 100 keys", |b| {
        let store = Store::open_in_memory().unwrap();
        let mut round = 0u64;
        b.iter(|| {
            round += 1;
            let mut batch = DefineBatch::new("bench");
            for i in 0..100u64 {
                let key = format!("key{}_{}", round, i);
                batch
                    .set(key.as_str(), "n", Some(Scalar::from(i as f64)))
                    .unwrap();
            }
            store.multi_define(&batch).unwrap();
        });
    });
}

fn bench_query(c: &mut Criterion) {
    let store = seeded_store(1000);
    let mut query = Select::new("bench");
    query.select = vec!["value".to_owned(), "n".to_owned()];
    query.add_where_group(vec![Criteria::new("n", ">=", "@min")]);
    query.add_param("@min", 900.0);

    c.bench_function("select with attribute filter", |b| {
        b.iter(|| {
            let rows = store.select(black_box(&query)).unwrap();
            assert_eq!(rows.len(), 100);
        });
    });

    c.bench_function("get by key", |b| {
        b.iter(|| {
            let got = store.get("bench", &[Scalar::from("key500")]).unwrap();
            assert!(got[0].is_some());
        });
    });
}

criterion_group!(benches, bench_define, bench_query);
criterion_main!(benches);

//! Metastore – a schema-flexible metadata store over a relational engine.
//!
//! Instead of fixed columns, data lives as (entity, attribute, value) triples
//! across a handful of relations the store manages for you:
//! * A [`registry::TableRow`] names a logical table and fixes whether its keys
//!   are numeric or textual.
//! * A [`registry::NameRow`] names an attribute within a table and fixes the
//!   numeric-ness of its values.
//! * Scalars are interned: equal values share one id, so triples and item keys
//!   are integer references into a single value relation.
//! * An item is one (table, key) entity carrying created/lastmodified stamps
//!   and any number of metadata triples.
//!
//! Tables, attributes and values are created as referred to; there is no
//! schema DDL. Type discipline is enforced instead of inferred: the first key
//! or value seen fixes a table's or attribute's numeric-ness, and later
//! mismatches are hard errors.
//!
//! ## Modules
//! * [`store`] – The [`store::Store`] itself: define/get/query/delete/drop,
//!   the deferred write queue, and the registry caches.
//! * [`registry`] – Get-or-create resolution for tables, names, values and
//!   items, with bounded optimistic retries instead of locks.
//! * [`query`] – Structured queries compiled to parameterized SQL; attributes
//!   become per-attribute left joins against the triple relation.
//! * [`parser`] – A restricted textual SQL subset parsed into [`query::Select`].
//! * [`longvalues`] – Free-text blobs beyond the interning length limit, with
//!   containment search.
//! * [`errlog`] – A supplemental timestamped error log.
//! * [`backend`] – The driver seam: a [`backend::Backend`] trait with a
//!   SQLite implementation; no custom storage format, the backing engine's
//!   file is the storage.
//!
//! ## Quick Start
//! ```
//! use metastore::datatype::Scalar;
//! use metastore::store::Store;
//!
//! let store = Store::open_in_memory().unwrap();
//! store
//!     .define("fun", "some", [
//!         ("num".to_owned(), Some(Scalar::from(42))),
//!         ("str".to_owned(), Some(Scalar::from("foobar"))),
//!     ])
//!     .unwrap();
//! let query = metastore::parser::parse("SELECT value, num, str FROM fun WHERE value = @k")
//!     .map(|mut q| { q.add_param("@k", "some"); q })
//!     .unwrap();
//! let rows = store.select(&query).unwrap();
//! assert_eq!(rows[0][1], Some(Scalar::from(42)));
//! ```

pub mod backend;
pub mod cache;
pub mod datatype;
pub mod errlog;
pub mod error;
pub mod longvalues;
pub mod parser;
pub mod query;
pub mod registry;
pub mod store;
pub mod util;

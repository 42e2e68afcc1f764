//! The store: wires the backing engine to the registry caches and implements
//! the public operations (define, get, query, delete, drop, reset, schema).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, info};

use crate::backend::{Backend, PostOp, SqlValue, SqliteBackend};
use crate::cache::SyncCache;
use crate::datatype::{Scalar, ScalarKey};
use crate::error::{MetaStoreError, Result};
use crate::query::Select;
use crate::registry::{NameRow, TableRow};
use crate::util::validate_table_name;

/// Ordered metadata for one item, keyed by attribute name.
pub type Metadata = BTreeMap<String, Scalar>;

/// The deferred write queue: mutating statements staged during one logical
/// operation, applied together in a single transaction. Dropping the queue
/// before flush leaves no durable trace.
#[derive(Debug, Default)]
pub(crate) struct OpQueue {
    pub(crate) ops: Vec<PostOp>,
}

impl OpQueue {
    pub(crate) fn new() -> Self {
        Self { ops: Vec::new() }
    }
    pub(crate) fn add(&mut self, op: PostOp) {
        self.ops.push(op);
    }
    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A batched define request: one table, any number of keys, each with a map
/// of attribute values where `None` erases the attribute.
#[derive(Debug, Clone)]
pub struct DefineBatch {
    pub(crate) table: String,
    pub(crate) rows: Vec<(Scalar, Vec<(String, Option<Scalar>)>)>,
    name_numeric: HashMap<String, bool>,
}

impl DefineBatch {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
            name_numeric: HashMap::new(),
        }
    }

    /// Stage one (key, attribute, value) entry. Mixing numeric and string
    /// values under one attribute name within a batch is rejected up front,
    /// before any I/O.
    pub fn set(
        &mut self,
        key: impl Into<Scalar>,
        name: impl Into<String>,
        value: Option<Scalar>,
    ) -> Result<()> {
        let key = key.into();
        let name = name.into();
        if let Some(value) = &value {
            match self.name_numeric.get(&name) {
                None => {
                    self.name_numeric.insert(name.clone(), value.is_numeric());
                }
                Some(expected) if *expected != value.is_numeric() => {
                    return Err(MetaStoreError::NameTypeMismatch {
                        name,
                        name_is_numeric: *expected,
                        value_is_numeric: value.is_numeric(),
                        value: value.to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        let key_id = ScalarKey::from(&key);
        let index = match self
            .rows
            .iter()
            .position(|(k, _)| ScalarKey::from(k) == key_id)
        {
            Some(index) => index,
            None => {
                self.rows.push((key, Vec::new()));
                self.rows.len() - 1
            }
        };
        let row = &mut self.rows[index].1;
        match row.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => row.push((name, value)),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A schema-flexible metadata store on top of a relational backing engine.
/// Shareable across threads; every instance owns its registry caches, so
/// separate stores (and separate tests) never pollute each other.
pub struct Store {
    pub(crate) db: Box<dyn Backend>,
    pub(crate) table_ids: SyncCache<String, i64>,
    pub(crate) tables_by_id: SyncCache<i64, TableRow>,
    pub(crate) name_ids: SyncCache<(i64, String), i64>,
    pub(crate) names_by_id: SyncCache<i64, NameRow>,
    pub(crate) value_ids: SyncCache<ScalarKey, i64>,
    pub(crate) values_by_id: SyncCache<i64, Scalar>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_backend(Box::new(SqliteBackend::open(path)?)))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_backend(Box::new(SqliteBackend::open_in_memory()?)))
    }

    pub fn with_backend(db: Box<dyn Backend>) -> Self {
        Self {
            db,
            table_ids: SyncCache::new(),
            tables_by_id: SyncCache::new(),
            name_ids: SyncCache::new(),
            names_by_id: SyncCache::new(),
            value_ids: SyncCache::new(),
            values_by_id: SyncCache::new(),
        }
    }

    /// Invalidate every registry cache. Correctness never depends on cache
    /// contents, so this is always safe; it is mandatory around drop/reset.
    pub fn clear_caches(&self) {
        self.table_ids.clear();
        self.tables_by_id.clear();
        self.name_ids.clear();
        self.names_by_id.clear();
        self.value_ids.clear();
        self.values_by_id.clear();
    }

    pub(crate) fn flush(&self, queue: OpQueue) -> Result<()> {
        if queue.is_empty() {
            return Ok(());
        }
        self.db.apply(&queue.ops)
    }

    /// Define metadata for a single key. The batched [`Store::multi_define`]
    /// is the general case; this is its one-key specialization.
    pub fn define<I, N>(&self, table: &str, key: impl Into<Scalar>, metadata: I) -> Result<()>
    where
        I: IntoIterator<Item = (N, Option<Scalar>)>,
        N: Into<String>,
    {
        let mut batch = DefineBatch::new(table);
        let key = key.into();
        for (name, value) in metadata {
            batch.set(key.clone(), name, value)?;
        }
        self.multi_define(&batch)
    }

    /// Resolve or create every identifier a batch needs, stage the metadata
    /// writes, and commit them in one transaction. All-or-nothing: any
    /// failure before commit discards the staged writes and clears the
    /// potentially dirty caches.
    pub fn multi_define(&self, batch: &DefineBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let result = self.multi_define_inner(batch);
        if result.is_err() {
            self.clear_caches();
        }
        result
    }

    fn multi_define_inner(&self, batch: &DefineBatch) -> Result<()> {
        let first_key_numeric = batch.rows[0].0.is_numeric();
        let table_id = self.table_id(&batch.table, first_key_numeric)?;
        let table = self.table_row(table_id)?;
        for (key, _) in &batch.rows {
            if key.is_numeric() != table.is_numeric {
                return Err(MetaStoreError::TableTypeMismatch {
                    table: table.name.clone(),
                    table_is_numeric: table.is_numeric,
                    key_is_numeric: key.is_numeric(),
                    key: key.to_string(),
                });
            }
        }

        // One resolution per distinct key and per distinct scalar, reused
        // across the whole call.
        let mut value_ids: HashMap<ScalarKey, i64> = HashMap::new();
        for (key, _) in &batch.rows {
            let key_id = ScalarKey::from(key);
            if !value_ids.contains_key(&key_id) {
                value_ids.insert(key_id, self.value_id(key)?);
            }
        }

        let mut item_ids: HashMap<ScalarKey, i64> = HashMap::new();
        for (key, _) in &batch.rows {
            let key_id = ScalarKey::from(key);
            if !item_ids.contains_key(&key_id) {
                let item_id = self.item_id(table_id, value_ids[&key_id])?;
                item_ids.insert(key_id, item_id);
            }
        }

        // Distinct attribute names; a created name's type is fixed by the
        // first value seen for it (erase entries count as numeric).
        let mut name_ids: HashMap<String, i64> = HashMap::new();
        for (_, metadata) in &batch.rows {
            for (name, value) in metadata {
                if !name_ids.contains_key(name) {
                    let is_numeric = value.as_ref().map(|v| v.is_numeric()).unwrap_or(true);
                    name_ids.insert(name.clone(), self.name_id(table_id, name, is_numeric)?);
                }
            }
        }
        self.cache_names(name_ids.values().copied())?;

        let mut queue = OpQueue::new();
        for (key, metadata) in &batch.rows {
            if metadata.is_empty() {
                continue;
            }
            let mut item_data: Vec<(i64, Option<i64>)> = Vec::with_capacity(metadata.len());
            for (name, value) in metadata {
                let name_id = name_ids[name];
                match value {
                    None => item_data.push((name_id, None)),
                    Some(value) => {
                        let name_row = self.name_row(name_id)?;
                        if value.is_numeric() != name_row.is_numeric {
                            return Err(MetaStoreError::NameTypeMismatch {
                                name: name_row.name.clone(),
                                name_is_numeric: name_row.is_numeric,
                                value_is_numeric: value.is_numeric(),
                                value: value.to_string(),
                            });
                        }
                        let value_key = ScalarKey::from(value);
                        let value_id = match value_ids.get(&value_key) {
                            Some(id) => *id,
                            None => {
                                let id = self.value_id(value)?;
                                value_ids.insert(value_key, id);
                                id
                            }
                        };
                        item_data.push((name_id, Some(value_id)));
                    }
                }
            }
            self.stage_item_data(&mut queue, item_ids[&ScalarKey::from(key)], &item_data);
        }

        debug!(table = %batch.table, keys = batch.rows.len(), ops = queue.ops.len(), "define staged");
        self.flush(queue)
    }

    /// Fetch the metadata dictionaries for a set of keys, in request order;
    /// `None` marks a key with no item. The table must exist.
    pub fn get(&self, table: &str, keys: &[Scalar]) -> Result<Vec<Option<Metadata>>> {
        let table_id = self
            .table_id_no_create(table)?
            .ok_or_else(|| MetaStoreError::NotFound {
                operation: "Get",
                target: table.to_owned(),
            })?;
        let mut responses = Vec::with_capacity(keys.len());
        for key in keys {
            let value_id = self.value_id(key)?;
            match self.item_id_no_create(table_id, value_id)? {
                None => responses.push(None),
                Some(item_id) => {
                    let triples = self.item_data(item_id)?;
                    responses.push(Some(self.metadata_values(&triples)?));
                }
            }
        }
        Ok(responses)
    }

    /// Translate raw (name id, value id) triples back into names and scalars,
    /// bulk-filling both caches first so the translation itself is one round
    /// trip per cache-missing id set, not one per id.
    pub fn metadata_values(&self, ids: &HashMap<i64, i64>) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        if ids.is_empty() {
            return Ok(metadata);
        }
        self.cache_names(ids.keys().copied())?;
        self.cache_values(ids.values().copied())?;
        for (name_id, value_id) in ids {
            let name = self.name_row(*name_id)?;
            let value = self.value_scalar(*value_id)?;
            metadata.insert(name.name, value);
        }
        Ok(metadata)
    }

    /// Run a compiled query and return each matching item's full metadata
    /// dictionary, with `id` and `value` pseudo-columns filled in. The
    /// request's own select list is ignored.
    pub fn query_get(&self, request: &Select) -> Result<Vec<Metadata>> {
        let mut select = request.clone();
        select.select = vec!["id".to_owned(), "value".to_owned()];
        let rows = self.select_raw(&select)?;
        let mut responses = Vec::with_capacity(rows.len());
        for row in rows {
            let item_id = row[0].as_i64().ok_or_else(|| {
                MetaStoreError::Query("query did not produce an item id".to_owned())
            })?;
            let triples = self.item_data(item_id)?;
            let mut metadata = self.metadata_values(&triples)?;
            metadata.insert("id".to_owned(), Scalar::Number(item_id as f64));
            if let Some(key) = scalar_from_sql(&row[1]) {
                metadata.insert("value".to_owned(), key);
            }
            responses.push(metadata);
        }
        Ok(responses)
    }

    /// Compile and run a structured query, returning the raw projected rows;
    /// absent attributes surface as `None`.
    pub fn select(&self, query: &Select) -> Result<Vec<Vec<Option<Scalar>>>> {
        let rows = self.select_raw(query)?;
        Ok(rows
            .into_iter()
            .map(|row| row.iter().map(scalar_from_sql).collect())
            .collect())
    }

    fn select_raw(&self, query: &Select) -> Result<Vec<Vec<SqlValue>>> {
        let (sql, params) = crate::query::generate_sql(self, query)?;
        self.db.rows(&sql, &params)
    }

    /// Run a structured query expected to produce one value.
    pub fn select_scalar(&self, query: &Select) -> Result<Option<Scalar>> {
        let rows = self.select_raw(query)?;
        Ok(rows.first().and_then(|row| scalar_from_sql(&row[0])))
    }

    /// The items row id for a key, or `None` when the table or key is absent.
    pub fn row_id(&self, table: &str, key: &Scalar) -> Result<Option<i64>> {
        validate_table_name(table)?;
        let mut select = Select::new(table);
        select.select = vec!["id".to_owned()];
        select.add_where_group(vec![crate::query::Criteria::new("value", "=", "@value")]);
        select.add_param("@value", key.clone());
        let rows = self.select_raw(&select)?;
        Ok(rows.first().and_then(|row| row[0].as_i64()))
    }

    /// The key stored under an items row id.
    pub fn row_value(&self, table: &str, id: i64) -> Result<Option<Scalar>> {
        validate_table_name(table)?;
        let mut select = Select::new(table);
        select.select = vec!["value".to_owned()];
        select.add_where_group(vec![crate::query::Criteria::new("id", "=", "@id")]);
        select.add_param("@id", Scalar::Number(id as f64));
        self.select_scalar(&select)
    }

    /// Delete items by key. Unknown tables and keys are no-ops.
    pub fn delete(&self, table: &str, keys: &[Scalar]) -> Result<()> {
        let Some(table_id) = self.table_id_no_create(table)? else {
            return Ok(());
        };
        let mut queue = OpQueue::new();
        for key in keys {
            let value_id = self.value_id(key)?;
            let item_filter = format!(
                "SELECT id FROM items WHERE valueid = {} AND tableid = {}",
                value_id, table_id
            );
            queue.add(PostOp::new(format!(
                "DELETE FROM itemnamevalues WHERE itemid IN ({})",
                item_filter
            )));
            queue.add(PostOp::new(format!(
                "DELETE FROM longstrings WHERE itemid IN ({})",
                item_filter
            )));
            queue.add(PostOp::new(format!(
                "DELETE FROM items WHERE valueid = {} AND tableid = {}",
                value_id, table_id
            )));
        }
        self.flush(queue)
    }

    /// Drop one table and everything scoped to it. All registry caches are
    /// invalidated so stale ids cannot outlive the rows.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.clear_caches();
        let Some(table_id) = self.table_id_no_create(table)? else {
            self.clear_caches();
            return Ok(());
        };
        info!(table, "dropping table");
        self.db.execute(
            &format!(
                "DELETE FROM itemnamevalues WHERE nameid IN (SELECT id FROM names WHERE tableid = {})",
                table_id
            ),
            &[],
        )?;
        self.db.execute(
            &format!(
                "DELETE FROM longstrings WHERE itemid IN (SELECT id FROM items WHERE tableid = {})",
                table_id
            ),
            &[],
        )?;
        self.db
            .execute(&format!("DELETE FROM names WHERE tableid = {}", table_id), &[])?;
        self.db
            .execute(&format!("DELETE FROM items WHERE tableid = {}", table_id), &[])?;
        self.db
            .execute(&format!("DELETE FROM tables WHERE id = {}", table_id), &[])?;
        self.clear_caches();
        Ok(())
    }

    /// Wipe all items and their metadata; with `include_interned` the
    /// interned values and the table/name registries go too.
    pub fn reset(&self, include_interned: bool) -> Result<()> {
        info!(include_interned, "resetting store");
        self.db.execute("DELETE FROM itemnamevalues", &[])?;
        self.db.execute("DELETE FROM longstrings", &[])?;
        self.db.execute("DELETE FROM items", &[])?;
        if include_interned {
            self.db.execute("DELETE FROM bvalues", &[])?;
            self.db.execute("DELETE FROM names", &[])?;
            self.db.execute("DELETE FROM tables", &[])?;
        }
        self.clear_caches();
        Ok(())
    }

    /// List tables and their attribute names, ordered, optionally restricted
    /// to one table.
    pub fn schema(&self, table: Option<&str>) -> Result<Vec<(String, Vec<String>)>> {
        let mut sql = String::from(
            "SELECT t.name AS tablename, n.name AS colname \
             FROM tables t JOIN names n ON n.tableid = t.id",
        );
        let mut params = Vec::new();
        if let Some(table) = table {
            validate_table_name(table)?;
            sql.push_str(" WHERE t.name = @name");
            params.push(("@name".to_owned(), SqlValue::Text(table.to_owned())));
        }
        sql.push_str(" ORDER BY tablename, colname");
        let rows = self.db.rows(&sql, &params)?;
        let mut schema: Vec<(String, Vec<String>)> = Vec::new();
        for row in rows {
            let (SqlValue::Text(table_name), SqlValue::Text(col_name)) = (&row[0], &row[1]) else {
                continue;
            };
            match schema.last_mut() {
                Some((current, cols)) if current == table_name => cols.push(col_name.clone()),
                _ => schema.push((table_name.clone(), vec![col_name.clone()])),
            }
        }
        Ok(schema)
    }

    /// Explicitly create a table. Usually unnecessary, as tables are created
    /// as referred to.
    pub fn create_table(&self, name: &str, is_numeric: bool) -> Result<()> {
        self.table_id(name, is_numeric)?;
        Ok(())
    }
}

pub(crate) fn scalar_from_sql(value: &SqlValue) -> Option<Scalar> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(Scalar::Number(*i as f64)),
        SqlValue::Real(r) => Some(Scalar::Number(*r)),
        SqlValue::Text(s) => Some(Scalar::Text(s.clone())),
    }
}

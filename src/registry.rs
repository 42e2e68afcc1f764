//! The four identifier registries: tables, names, interned values and items.
//!
//! Each registry resolves a natural key to a durable row id through the same
//! protocol: consult the store-owned cache, read the backing engine on a
//! miss, insert when creation is allowed, and re-read when the insert loses a
//! race to a concurrent creator. The bounded retry loop in
//! [`crate::util::resolve_with_retries`] replaces row-level locking.

use std::collections::HashMap;

use tracing::debug;

use crate::datatype::{Scalar, ScalarKey};
use crate::error::{MetaStoreError, Result};
use crate::store::{OpQueue, Store};
use crate::backend::{PostOp, SqlValue};
use crate::util::{resolve_with_retries, validate_column_name, validate_table_name};

/// Largest string the value interner accepts; longer payloads belong in the
/// long-value store.
pub const MAX_STRING_LENGTH: usize = 255;

/// Cap on the generated SQL of a bulk cache-fill query.
pub const MAX_BATCH_SQL_LENGTH: usize = 1_000_000;

const TABLE_RETRIES: u32 = 4;
const NAME_RETRIES: u32 = 4;
const VALUE_RETRIES: u32 = 3;
const ITEM_RETRIES: u32 = 4;

#[derive(Debug, Clone)]
pub struct TableRow {
    pub id: i64,
    pub name: String,
    pub is_numeric: bool,
}

#[derive(Debug, Clone)]
pub struct NameRow {
    pub id: i64,
    pub table_id: i64,
    pub name: String,
    pub is_numeric: bool,
}

fn int_param(name: &str, value: i64) -> (String, SqlValue) {
    (name.to_owned(), SqlValue::Integer(value))
}

fn text_param(name: &str, value: &str) -> (String, SqlValue) {
    (name.to_owned(), SqlValue::Text(value.to_owned()))
}

// ------------- Tables -------------
impl Store {
    /// Resolve a table name to its id, creating the table with the given key
    /// type on first reference.
    pub fn table_id(&self, name: &str, is_numeric: bool) -> Result<i64> {
        if let Some(id) = self.table_ids.get(&name.to_owned()) {
            return Ok(id);
        }
        validate_table_name(name)?;
        let params = vec![
            text_param("@name", name),
            int_param("@isNumeric", is_numeric as i64),
        ];
        let id = resolve_with_retries("Tables.GetId", TABLE_RETRIES, || {
            if let Some(id) = self
                .db
                .scalar("SELECT id FROM tables WHERE name = @name", &params)?
                .and_then(|v| v.as_i64())
            {
                return Ok(Some(id));
            }
            debug!(table = name, is_numeric, "creating table");
            self.db.insert(
                "INSERT INTO tables (name, isNumeric) VALUES (@name, @isNumeric)",
                &params,
            )
        })?;
        self.table_ids.put(name.to_owned(), id);
        Ok(id)
    }

    /// Read-path lookup: never creates, `None` when the table does not exist.
    pub fn table_id_no_create(&self, name: &str) -> Result<Option<i64>> {
        if let Some(id) = self.table_ids.get(&name.to_owned()) {
            return Ok(Some(id));
        }
        validate_table_name(name)?;
        let found = self
            .db
            .scalar("SELECT id FROM tables WHERE name = @name", &[text_param(
                "@name", name,
            )])?
            .and_then(|v| v.as_i64());
        if let Some(id) = found {
            self.table_ids.put(name.to_owned(), id);
        }
        Ok(found)
    }

    pub fn table_row(&self, id: i64) -> Result<TableRow> {
        if let Some(row) = self.tables_by_id.get(&id) {
            return Ok(row);
        }
        let sql = format!("SELECT name, isNumeric FROM tables WHERE id = {}", id);
        let rows = self.db.rows(&sql, &[])?;
        let row = rows.first().ok_or(MetaStoreError::NotFound {
            operation: "Tables.GetTable",
            target: id.to_string(),
        })?;
        let table = TableRow {
            id,
            name: match &row[0] {
                SqlValue::Text(s) => s.clone(),
                other => other.as_i64().map(|i| i.to_string()).unwrap_or_default(),
            },
            is_numeric: row[1].as_i64().unwrap_or(0) != 0,
        };
        self.tables_by_id.put(id, table.clone());
        Ok(table)
    }
}

// ------------- Names -------------
impl Store {
    /// Resolve an attribute name within a table, creating it on first use.
    /// The numeric flag of a created name is fixed forever by the first value
    /// seen under it.
    pub fn name_id(&self, table_id: i64, name: &str, is_numeric: bool) -> Result<i64> {
        let cache_key = (table_id, name.to_owned());
        if let Some(id) = self.name_ids.get(&cache_key) {
            return Ok(id);
        }
        validate_column_name(name)?;
        let params = vec![
            int_param("@tableId", table_id),
            text_param("@name", name),
            int_param("@isNumeric", is_numeric as i64),
        ];
        let id = resolve_with_retries("Names.GetId", NAME_RETRIES, || {
            if let Some(id) = self
                .db
                .scalar(
                    "SELECT id FROM names WHERE tableid = @tableId AND name = @name",
                    &params,
                )?
                .and_then(|v| v.as_i64())
            {
                return Ok(Some(id));
            }
            self.db.insert(
                "INSERT INTO names (tableid, name, isNumeric) VALUES (@tableId, @name, @isNumeric)",
                &params,
            )
        })?;
        self.name_ids.put(cache_key, id);
        Ok(id)
    }

    pub fn name_id_no_create(&self, table_id: i64, name: &str) -> Result<Option<i64>> {
        let cache_key = (table_id, name.to_owned());
        if let Some(id) = self.name_ids.get(&cache_key) {
            return Ok(Some(id));
        }
        validate_column_name(name)?;
        let found = self
            .db
            .scalar(
                "SELECT id FROM names WHERE tableid = @tableId AND name = @name",
                &[int_param("@tableId", table_id), text_param("@name", name)],
            )?
            .and_then(|v| v.as_i64());
        if let Some(id) = found {
            self.name_ids.put(cache_key, id);
        }
        Ok(found)
    }

    pub fn name_row(&self, id: i64) -> Result<NameRow> {
        if let Some(row) = self.names_by_id.get(&id) {
            return Ok(row);
        }
        let sql = format!("SELECT tableid, name, isNumeric FROM names WHERE id = {}", id);
        let rows = self.db.rows(&sql, &[])?;
        let row = rows.first().ok_or(MetaStoreError::NotFound {
            operation: "Names.GetName",
            target: id.to_string(),
        })?;
        let name = NameRow {
            id,
            table_id: row[0].as_i64().unwrap_or(-1),
            name: match &row[1] {
                SqlValue::Text(s) => s.clone(),
                _ => String::new(),
            },
            is_numeric: row[2].as_i64().unwrap_or(0) != 0,
        };
        self.names_by_id.put(id, name.clone());
        Ok(name)
    }

    /// Bulk cache fill for a set of name ids: one IN query for whatever is
    /// still missing, bounded by the generated-SQL cap.
    pub fn cache_names(&self, ids: impl IntoIterator<Item = i64>) -> Result<()> {
        let still_to_get: Vec<i64> = ids
            .into_iter()
            .filter(|id| !self.names_by_id.contains_key(id))
            .collect();
        if still_to_get.is_empty() {
            return Ok(());
        }
        let in_part = still_to_get
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id, tableid, name, isNumeric FROM names WHERE id IN ({})",
            in_part
        );
        if sql.len() > MAX_BATCH_SQL_LENGTH {
            return Err(MetaStoreError::SizeExceeded(
                "names cache query exceeds the SQL batch limit; use smaller batches of items"
                    .to_owned(),
            ));
        }
        let rows = self.db.rows(&sql, &[])?;
        self.names_by_id.put_many(rows.into_iter().filter_map(|row| {
            let id = row[0].as_i64()?;
            Some((id, NameRow {
                id,
                table_id: row[1].as_i64()?,
                name: match &row[2] {
                    SqlValue::Text(s) => s.clone(),
                    _ => return None,
                },
                is_numeric: row[3].as_i64().unwrap_or(0) != 0,
            }))
        }));
        Ok(())
    }
}

// ------------- Values -------------
impl Store {
    /// Intern a scalar, returning its stable id. Equal scalars always map to
    /// the same id for the lifetime of the store.
    pub fn value_id(&self, value: &Scalar) -> Result<i64> {
        if let Scalar::Text(s) = value {
            // The cap counts characters, not bytes, so multi-byte text gets
            // the same room as ASCII.
            if s.chars().count() > MAX_STRING_LENGTH {
                return Err(MetaStoreError::SizeExceeded(format!(
                    "string length limit reached: {}",
                    MAX_STRING_LENGTH
                )));
            }
        }
        // Non-integral numbers bypass the cache, as there are arbitrarily
        // many of them and they rarely repeat.
        let should_cache = match value {
            Scalar::Text(_) => true,
            Scalar::Number(n) => *n == n.trunc(),
        };
        let key = ScalarKey::from(value);
        if should_cache {
            if let Some(id) = self.value_ids.get(&key) {
                return Ok(id);
            }
        }
        let (select_sql, insert_sql, params) = match value {
            Scalar::Text(s) => (
                "SELECT id FROM bvalues WHERE isNumeric = 0 AND stringValue = @stringValue",
                "INSERT INTO bvalues (isNumeric, numberValue, stringValue) VALUES (0, 0.0, @stringValue)",
                vec![text_param("@stringValue", s)],
            ),
            Scalar::Number(n) => (
                "SELECT id FROM bvalues WHERE isNumeric = 1 AND numberValue = @numberValue",
                "INSERT INTO bvalues (isNumeric, numberValue, stringValue) VALUES (1, @numberValue, '')",
                vec![("@numberValue".to_owned(), SqlValue::Real(*n))],
            ),
        };
        let id = resolve_with_retries("Values.GetId", VALUE_RETRIES, || {
            if let Some(id) = self.db.scalar(select_sql, &params)?.and_then(|v| v.as_i64()) {
                return Ok(Some(id));
            }
            self.db.insert(insert_sql, &params)
        })?;
        if should_cache {
            self.value_ids.put(key, id);
        }
        Ok(id)
    }

    pub fn value_scalar(&self, id: i64) -> Result<Scalar> {
        if let Some(value) = self.values_by_id.get(&id) {
            return Ok(value);
        }
        let sql = format!(
            "SELECT isNumeric, numberValue, stringValue FROM bvalues WHERE id = {}",
            id
        );
        let rows = self.db.rows(&sql, &[])?;
        let row = rows.first().ok_or(MetaStoreError::NotFound {
            operation: "Values.GetValue",
            target: id.to_string(),
        })?;
        let value = decode_value_row(&row[0], &row[1], &row[2]);
        self.values_by_id.put(id, value.clone());
        Ok(value)
    }

    pub fn cache_values(&self, ids: impl IntoIterator<Item = i64>) -> Result<()> {
        let still_to_get: Vec<i64> = ids
            .into_iter()
            .filter(|id| !self.values_by_id.contains_key(id))
            .collect();
        if still_to_get.is_empty() {
            return Ok(());
        }
        let in_part = still_to_get
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id, isNumeric, numberValue, stringValue FROM bvalues WHERE id IN ({})",
            in_part
        );
        if sql.len() > MAX_BATCH_SQL_LENGTH {
            return Err(MetaStoreError::SizeExceeded(
                "values cache query exceeds the SQL batch limit; use smaller batches of items"
                    .to_owned(),
            ));
        }
        let rows = self.db.rows(&sql, &[])?;
        self.values_by_id.put_many(rows.into_iter().filter_map(|row| {
            let id = row[0].as_i64()?;
            Some((id, decode_value_row(&row[1], &row[2], &row[3])))
        }));
        Ok(())
    }
}

fn decode_value_row(is_numeric: &SqlValue, number: &SqlValue, string: &SqlValue) -> Scalar {
    if is_numeric.as_i64().unwrap_or(0) != 0 {
        match number {
            SqlValue::Real(r) => Scalar::Number(*r),
            SqlValue::Integer(i) => Scalar::Number(*i as f64),
            _ => Scalar::Number(0.0),
        }
    } else {
        match string {
            SqlValue::Text(s) => Scalar::Text(s.clone()),
            _ => Scalar::Text(String::new()),
        }
    }
}

// ------------- Items -------------
impl Store {
    /// Resolve (table, interned key) to the item row id, creating the item on
    /// first definition. Creation goes through the engine's insert-ignore so
    /// a lost race simply re-reads.
    pub fn item_id(&self, table_id: i64, value_id: i64) -> Result<i64> {
        let params = vec![
            int_param("@tableId", table_id),
            int_param("@valueId", value_id),
        ];
        let insert_sql = format!(
            "{} items (tableid, valueid, created, lastmodified) VALUES (@tableId, @valueId, {}, {})",
            self.db.insert_ignore(),
            self.db.utc_now(),
            self.db.utc_now()
        );
        resolve_with_retries("Items.GetId", ITEM_RETRIES, || {
            if let Some(id) = self
                .db
                .scalar(
                    "SELECT id FROM items WHERE tableid = @tableId AND valueid = @valueId",
                    &params,
                )?
                .and_then(|v| v.as_i64())
            {
                return Ok(Some(id));
            }
            self.db.insert(&insert_sql, &params)
        })
    }

    pub fn item_id_no_create(&self, table_id: i64, value_id: i64) -> Result<Option<i64>> {
        Ok(self
            .db
            .scalar(
                "SELECT id FROM items WHERE tableid = @tableId AND valueid = @valueId",
                &[int_param("@tableId", table_id), int_param("@valueId", value_id)],
            )?
            .and_then(|v| v.as_i64()))
    }

    /// The raw metadata triples of one item: name id to value id.
    pub fn item_data(&self, item_id: i64) -> Result<HashMap<i64, i64>> {
        let sql = format!(
            "SELECT nameid, valueid FROM itemnamevalues WHERE itemid = {}",
            item_id
        );
        let rows = self.db.rows(&sql, &[])?;
        let mut data = HashMap::with_capacity(rows.len());
        for row in rows {
            if let (Some(name_id), Some(value_id)) = (row[0].as_i64(), row[1].as_i64()) {
                data.insert(name_id, value_id);
            }
        }
        Ok(data)
    }

    /// Stage an item's metadata changes into the deferred write queue: a
    /// lastmodified touch, then one upsert or delete per (name, value) pair.
    /// `None` is the erase sentinel.
    pub(crate) fn stage_item_data(
        &self,
        queue: &mut OpQueue,
        item_id: i64,
        item_data: &[(i64, Option<i64>)],
    ) {
        queue.add(PostOp::new(format!(
            "UPDATE items SET lastmodified = {} WHERE id = {}",
            self.db.utc_now(),
            item_id
        )));
        for (name_id, value_id) in item_data {
            let sql = match value_id {
                Some(value_id) => format!(
                    "INSERT INTO itemnamevalues (itemid, nameid, valueid) VALUES ({}, {}, {}) \
                     ON CONFLICT (itemid, nameid) DO UPDATE SET valueid = {}",
                    item_id, name_id, value_id, value_id
                ),
                None => format!(
                    "DELETE FROM itemnamevalues WHERE itemid = {} AND nameid = {}",
                    item_id, name_id
                ),
            };
            queue.add(PostOp::new(sql));
        }
    }

    /// Remove one item and everything hanging off it.
    pub fn delete_item(&self, item_id: i64) -> Result<()> {
        self.db.execute(
            &format!("DELETE FROM itemnamevalues WHERE itemid = {}", item_id),
            &[],
        )?;
        self.db.execute(
            &format!("DELETE FROM longstrings WHERE itemid = {}", item_id),
            &[],
        )?;
        self.db
            .execute(&format!("DELETE FROM items WHERE id = {}", item_id), &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn non_integral_numbers_resolve_without_caching() {
        let store = Store::open_in_memory().unwrap();
        let a = store.value_id(&Scalar::from(3.25)).unwrap();
        let b = store.value_id(&Scalar::from(3.25)).unwrap();
        assert_eq!(a, b);
        assert!(store.value_ids.is_empty());

        let c = store.value_id(&Scalar::from(3.0)).unwrap();
        assert_ne!(a, c);
        assert!(!store.value_ids.is_empty());
    }

    #[test]
    fn table_rows_cache_back_from_id() {
        let store = Store::open_in_memory().unwrap();
        let id = store.table_id("fun", false).unwrap();
        let row = store.table_row(id).unwrap();
        assert_eq!(row.name, "fun");
        assert!(!row.is_numeric);
        assert_eq!(store.table_id_no_create("fun").unwrap(), Some(id));
        assert_eq!(store.table_id_no_create("other").unwrap(), None);
    }

    #[test]
    fn name_type_is_first_writer_wins() {
        let store = Store::open_in_memory().unwrap();
        let table_id = store.table_id("fun", false).unwrap();
        let id = store.name_id(table_id, "num", true).unwrap();
        // A later resolution with the other flag still returns the same row.
        let again = store.name_id(table_id, "num", false).unwrap();
        assert_eq!(id, again);
        assert!(store.name_row(id).unwrap().is_numeric);
    }

    #[test]
    fn oversized_cache_fill_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let ids: Vec<i64> = (0..110_000).map(|i| i + 10_000_000_000).collect();
        assert!(matches!(
            store.cache_values(ids),
            Err(MetaStoreError::SizeExceeded(_))
        ));
    }

    #[test]
    fn delete_item_scrubs_dependents() {
        let store = Store::open_in_memory().unwrap();
        store
            .define("fun", "some", [("num".to_owned(), Some(Scalar::from(1)))])
            .unwrap();
        store
            .put_long_value("fun", &Scalar::from("some"), "blurb", "text")
            .unwrap();
        let item = store.row_id("fun", &Scalar::from("some")).unwrap().unwrap();
        store.delete_item(item).unwrap();
        assert!(store.item_data(item).unwrap().is_empty());
        assert!(store.row_id("fun", &Scalar::from("some")).unwrap().is_none());
        assert_eq!(
            store
                .get_long_value("fun", &Scalar::from("some"), "blurb", None)
                .unwrap(),
            None
        );
    }
}

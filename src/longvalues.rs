//! The long-value store: one free-text blob per (item, field), bypassing the
//! 255-unit interning limit. Writes go straight through, not via the deferred
//! queue, since each call touches exactly one row.

use tracing::debug;

use crate::backend::SqlValue;
use crate::datatype::Scalar;
use crate::error::{MetaStoreError, Result};
use crate::store::{scalar_from_sql, Store};
use crate::util::{validate_column_name, validate_table_name};

/// Upper bound on one long value, in bytes.
pub const MAX_LONG_VALUE_LENGTH: usize = 64 * 1024;

impl Store {
    /// Upsert the long value under (key, field), creating the table and item
    /// as referred to. Update first; zero rows affected means first write, so
    /// fall back to insert.
    pub fn put_long_value(
        &self,
        table: &str,
        key: &Scalar,
        field: &str,
        text: &str,
    ) -> Result<()> {
        validate_table_name(table)?;
        validate_column_name(field)?;
        if text.chars().count() > MAX_LONG_VALUE_LENGTH {
            return Err(MetaStoreError::SizeExceeded(format!(
                "long value of {} bytes exceeds the {} byte limit",
                text.len(),
                MAX_LONG_VALUE_LENGTH
            )));
        }
        let table_id = self.table_id(table, key.is_numeric())?;
        let value_id = self.value_id(key)?;
        let item_id = self.item_id(table_id, value_id)?;
        let params = vec![("@text".to_owned(), SqlValue::Text(text.to_owned()))];
        let affected = self.db.execute(
            &format!(
                "UPDATE longstrings SET longstring = @text \
                 WHERE itemid = {} AND name = '{}'",
                item_id, field
            ),
            &params,
        )?;
        if affected == 0 {
            self.db.execute(
                &format!(
                    "INSERT INTO longstrings (itemid, name, longstring) \
                     VALUES ({}, '{}', @text)",
                    item_id, field
                ),
                &params,
            )?;
        }
        debug!(table, field, bytes = text.len(), "long value stored");
        Ok(())
    }

    /// Fetch the long value under (key, field); with `like` set, only when
    /// the text also matches the pattern. Absent table, item or row is `None`.
    pub fn get_long_value(
        &self,
        table: &str,
        key: &Scalar,
        field: &str,
        like: Option<&str>,
    ) -> Result<Option<String>> {
        validate_table_name(table)?;
        validate_column_name(field)?;
        let Some(item_id) = self.long_value_item(table, key)? else {
            return Ok(None);
        };
        let mut sql = format!(
            "SELECT longstring FROM longstrings WHERE itemid = {} AND name = '{}'",
            item_id, field
        );
        let mut params = Vec::new();
        if let Some(pattern) = like {
            sql.push_str(" AND longstring LIKE @pattern");
            params.push(("@pattern".to_owned(), SqlValue::Text(pattern.to_owned())));
        }
        match self.db.scalar(&sql, &params)? {
            Some(SqlValue::Text(text)) => Ok(Some(text)),
            _ => Ok(None),
        }
    }

    /// Remove the long value under (key, field). Absent rows are a no-op.
    pub fn delete_long_value(&self, table: &str, key: &Scalar, field: &str) -> Result<()> {
        validate_column_name(field)?;
        let Some(item_id) = self.long_value_item(table, key)? else {
            return Ok(());
        };
        self.db.execute(
            &format!(
                "DELETE FROM longstrings WHERE itemid = {} AND name = '{}'",
                item_id, field
            ),
            &[],
        )?;
        Ok(())
    }

    /// Full-text containment search across every long value stored under
    /// `field` in `table`, returning the owning items' keys ordered by the
    /// backing engine's relevance, best first.
    pub fn query_long_values(
        &self,
        table: &str,
        field: &str,
        search: &str,
    ) -> Result<Vec<Scalar>> {
        validate_table_name(table)?;
        validate_column_name(field)?;
        let Some(table_id) = self.table_id_no_create(table)? else {
            return Ok(Vec::new());
        };
        let table_row = self.table_row(table_id)?;
        let key_column = if table_row.is_numeric {
            "bv.numberValue"
        } else {
            "bv.stringValue"
        };
        let sql = format!(
            "SELECT {key} AS value, {relevance} AS relevance \
             FROM longstrings ls \
             JOIN items i ON i.id = ls.itemid \
             JOIN bvalues bv ON bv.id = i.valueid \
             WHERE i.tableid = {table_id} AND ls.name = '{field}' AND {predicate} \
             ORDER BY relevance DESC",
            key = key_column,
            relevance = self.db.relevance_expr("ls.longstring", "@search"),
            predicate = self.db.matches_predicate("ls.longstring", "@search"),
        );
        let params = vec![("@search".to_owned(), SqlValue::Text(search.to_owned()))];
        let rows = self.db.rows(&sql, &params)?;
        Ok(rows
            .iter()
            .filter_map(|row| scalar_from_sql(&row[0]))
            .collect())
    }

    fn long_value_item(&self, table: &str, key: &Scalar) -> Result<Option<i64>> {
        validate_table_name(table)?;
        let Some(table_id) = self.table_id_no_create(table)? else {
            return Ok(None);
        };
        let value_id = self.value_id(key)?;
        self.item_id_no_create(table_id, value_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_then_overwrite() {
        let store = Store::open_in_memory().unwrap();
        let key = Scalar::from("page1");
        store
            .put_long_value("docs", &key, "body", "first draft")
            .unwrap();
        assert_eq!(
            store.get_long_value("docs", &key, "body", None).unwrap(),
            Some("first draft".to_owned())
        );
        store
            .put_long_value("docs", &key, "body", "second draft")
            .unwrap();
        assert_eq!(
            store.get_long_value("docs", &key, "body", None).unwrap(),
            Some("second draft".to_owned())
        );
    }

    #[test]
    fn get_with_pattern_filters() {
        let store = Store::open_in_memory().unwrap();
        let key = Scalar::from("page1");
        store
            .put_long_value("docs", &key, "body", "hello world")
            .unwrap();
        assert_eq!(
            store
                .get_long_value("docs", &key, "body", Some("%world%"))
                .unwrap(),
            Some("hello world".to_owned())
        );
        assert_eq!(
            store
                .get_long_value("docs", &key, "body", Some("%nothere%"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn oversized_value_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let huge = "x".repeat(MAX_LONG_VALUE_LENGTH + 1);
        let result = store.put_long_value("docs", &Scalar::from("k"), "body", &huge);
        assert!(matches!(result, Err(MetaStoreError::SizeExceeded(_))));
    }

    #[test]
    fn query_orders_by_relevance() {
        let store = Store::open_in_memory().unwrap();
        store
            .put_long_value("docs", &Scalar::from("late"), "body", "padding before needle")
            .unwrap();
        store
            .put_long_value("docs", &Scalar::from("early"), "body", "needle up front")
            .unwrap();
        let keys = store.query_long_values("docs", "body", "needle").unwrap();
        assert_eq!(
            keys,
            vec![Scalar::from("late"), Scalar::from("early")]
        );
    }

    #[test]
    fn delete_removes_the_row() {
        let store = Store::open_in_memory().unwrap();
        let key = Scalar::from("page1");
        store
            .put_long_value("docs", &key, "body", "soon gone")
            .unwrap();
        store.delete_long_value("docs", &key, "body").unwrap();
        assert_eq!(store.get_long_value("docs", &key, "body", None).unwrap(), None);
    }
}

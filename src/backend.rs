// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput, Value as RusqliteValue};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{MetaStoreError, Result};
use crate::util::extract_param_names;

/// A value crossing the driver boundary, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(r) => Some(*r as i64),
            _ => None,
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(RusqliteValue::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(RusqliteValue::Integer(*i)),
            SqlValue::Real(r) => ToSqlOutput::Owned(RusqliteValue::Real(*r)),
            SqlValue::Text(s) => ToSqlOutput::Owned(RusqliteValue::Text(s.clone())),
        })
    }
}

impl From<RusqliteValue> for SqlValue {
    fn from(value: RusqliteValue) -> Self {
        match value {
            RusqliteValue::Null => SqlValue::Null,
            RusqliteValue::Integer(i) => SqlValue::Integer(i),
            RusqliteValue::Real(r) => SqlValue::Real(r),
            RusqliteValue::Text(s) => SqlValue::Text(s),
            RusqliteValue::Blob(_) => SqlValue::Null,
        }
    }
}

/// Named parameters for one statement.
pub type SqlParams = Vec<(String, SqlValue)>;

/// One staged mutating statement, held by the deferred write queue until the
/// whole batch is applied in a single transaction.
#[derive(Debug, Clone)]
pub struct PostOp {
    pub sql: String,
    pub params: SqlParams,
}

impl PostOp {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
    pub fn with_params(sql: impl Into<String>, params: SqlParams) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// The backing relational engine as the store consumes it: parameterized
/// execution in a handful of shapes, atomic multi-statement application, and
/// the few dialect-specific snippets the pipeline and compiler need.
pub trait Backend: Send + Sync {
    /// Run a mutating statement, returning the affected row count.
    fn execute(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<usize>;
    /// Run an INSERT, returning the generated row id, or `None` when the
    /// statement inserted nothing (e.g. an ignored duplicate).
    fn insert(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<Option<i64>>;
    /// Run a query expected to produce at most one value.
    fn scalar(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<Option<SqlValue>>;
    /// Run a query, materializing every row.
    fn rows(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<Vec<Vec<SqlValue>>>;
    /// Apply every staged statement in order inside one transaction.
    fn apply(&self, ops: &[PostOp]) -> Result<()>;

    /// Dialect: INSERT prefix that silently skips duplicate-key rows.
    fn insert_ignore(&self) -> &'static str;
    /// Dialect: expression producing the current UTC timestamp.
    fn utc_now(&self) -> &'static str;
    /// Dialect: text-search containment predicate over a long-value column.
    fn matches_predicate(&self, column_expr: &str, param: &str) -> String;
    /// Dialect: the relevance the engine reports for a text-search match.
    fn relevance_expr(&self, column_expr: &str, param: &str) -> String;
}

/// rusqlite-backed implementation. The connection sits behind a mutex so a
/// store can be shared across threads; statements from concurrent callers
/// interleave at statement granularity, transactions hold the lock end to
/// end.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::prepare(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            create table if not exists tables (
                id integer primary key autoincrement,
                name text not null,
                isNumeric integer not null,
                constraint unique_table_name unique (name)
            );
            create table if not exists names (
                id integer primary key autoincrement,
                tableid integer not null,
                name text not null,
                isNumeric integer not null,
                constraint name_in_table foreign key (tableid) references tables(id),
                constraint unique_name_per_table unique (tableid, name)
            );
            create table if not exists bvalues (
                id integer primary key autoincrement,
                isNumeric integer not null,
                numberValue real not null,
                stringValue text not null,
                constraint unique_interned_value unique (isNumeric, numberValue, stringValue)
            );
            create table if not exists items (
                id integer primary key autoincrement,
                tableid integer not null,
                valueid integer not null,
                created text not null,
                lastmodified text not null,
                constraint item_in_table foreign key (tableid) references tables(id),
                constraint item_key_interned foreign key (valueid) references bvalues(id),
                constraint unique_item_per_key unique (tableid, valueid)
            );
            create table if not exists itemnamevalues (
                itemid integer not null,
                nameid integer not null,
                valueid integer not null,
                constraint triple_item foreign key (itemid) references items(id),
                constraint triple_name foreign key (nameid) references names(id),
                constraint unique_triple primary key (itemid, nameid)
            );
            create table if not exists longstrings (
                itemid integer not null,
                name text not null,
                longstring text not null,
                constraint longstring_item foreign key (itemid) references items(id),
                constraint unique_longstring unique (itemid, name)
            );
            create table if not exists errorlog (
                id integer primary key autoincrement,
                logdate text not null,
                msg text not null
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MetaStoreError::Lock(e.to_string()))
    }
}

/// Bind only the parameters the statement references; a referenced parameter
/// missing from the map is a backend error, surplus ones are dropped.
fn bind<'p>(
    sql: &str,
    params: &'p [(String, SqlValue)],
) -> Result<Vec<(&'p str, &'p dyn ToSql)>> {
    let referenced = extract_param_names(sql);
    let mut bound: Vec<(&str, &dyn ToSql)> = Vec::with_capacity(referenced.len());
    for name in &referenced {
        match params.iter().find(|(n, _)| n == name) {
            Some((n, v)) => bound.push((n.as_str(), v as &dyn ToSql)),
            None => {
                return Err(MetaStoreError::Backend(format!(
                    "statement references unbound parameter {}",
                    name
                )));
            }
        }
    }
    Ok(bound)
}

fn run(conn: &Connection, sql: &str, params: &[(String, SqlValue)]) -> Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    let bound = bind(sql, params)?;
    Ok(stmt.execute(&bound[..])?)
}

impl Backend for SqliteBackend {
    fn execute(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<usize> {
        let conn = self.lock()?;
        run(&conn, sql, params)
    }

    fn insert(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let affected = run(&conn, sql, params)?;
        if affected == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    fn scalar(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<Option<SqlValue>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let bound = bind(sql, params)?;
        let mut rows = stmt.query(&bound[..])?;
        match rows.next()? {
            Some(row) => Ok(Some(SqlValue::from(row.get::<_, RusqliteValue>(0)?))),
            None => Ok(None),
        }
    }

    fn rows(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<Vec<Vec<SqlValue>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let bound = bind(sql, params)?;
        let mut rows = stmt.query(&bound[..])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(SqlValue::from(row.get::<_, RusqliteValue>(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn apply(&self, ops: &[PostOp]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for op in ops {
            run(&tx, &op.sql, &op.params)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_ignore(&self) -> &'static str {
        "INSERT OR IGNORE INTO"
    }

    fn utc_now(&self) -> &'static str {
        "datetime('now')"
    }

    fn matches_predicate(&self, column_expr: &str, param: &str) -> String {
        format!("instr(lower({}), lower({})) > 0", column_expr, param)
    }

    fn relevance_expr(&self, column_expr: &str, param: &str) -> String {
        format!("instr(lower({}), lower({}))", column_expr, param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_ignore_reports_skipped_duplicate() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let sql = "INSERT OR IGNORE INTO tables (name, isNumeric) VALUES (@name, 0)";
        let params = vec![("@name".to_owned(), SqlValue::Text("t".to_owned()))];
        let first = db.insert(sql, &params).unwrap();
        assert!(first.is_some());
        let second = db.insert(sql, &params).unwrap();
        assert_eq!(second, None);
    }

    #[test]
    fn scalar_on_empty_result() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let got = db
            .scalar("SELECT id FROM tables WHERE name = @name", &[(
                "@name".to_owned(),
                SqlValue::Text("missing".to_owned()),
            )])
            .unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn apply_is_atomic() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let ops = vec![
            PostOp::new("INSERT INTO tables (name, isNumeric) VALUES ('a', 0)"),
            PostOp::new("INSERT INTO no_such_relation VALUES (1)"),
        ];
        assert!(db.apply(&ops).is_err());
        let count = db
            .scalar("SELECT COUNT(*) FROM tables", &[])
            .unwrap()
            .and_then(|v| v.as_i64());
        assert_eq!(count, Some(0));
    }

    #[test]
    fn unbound_parameter_is_an_error() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let err = db.scalar("SELECT id FROM tables WHERE name = @name", &[]);
        assert!(err.is_err());
    }
}

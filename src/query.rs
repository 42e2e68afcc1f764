//! Structured queries and their translation into parameterized SQL over the
//! items/itemnamevalues/bvalues relations. Each requested attribute becomes a
//! left join pair aliased per attribute; the pseudo-columns `id`, `value`,
//! `created` and `lastmodified` come straight off the items row.

use std::collections::HashMap;

use crate::backend::{SqlParams, SqlValue};
use crate::datatype::Scalar;
use crate::error::{MetaStoreError, Result};
use crate::store::Store;
use crate::util::{
    clean_name, extract_param_names, validate_column_name, validate_param_name,
    validate_table_name,
};

/// Operators accepted in WHERE criteria. `matches` is full-text containment
/// against the long-value rows; everything else compares interned values.
pub const OPERATORS: [&str; 8] = ["=", "<>", ">", ">=", "<", "<=", "matches", "like"];

/// One WHERE predicate. The right-hand side is always a named parameter;
/// literals are rejected so user input never reaches the SQL text.
#[derive(Debug, Clone)]
pub struct Criteria {
    pub name: String,
    pub op: String,
    pub param_name: String,
}

impl Criteria {
    pub fn new(
        name: impl Into<String>,
        op: impl Into<String>,
        param_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            param_name: param_name.into(),
        }
    }
}

/// Criteria combined by AND. Groups on a [`Select`] combine by OR.
#[derive(Debug, Clone, Default)]
pub struct CriteriaSet {
    pub criteria: Vec<Criteria>,
}

impl From<Vec<Criteria>> for CriteriaSet {
    fn from(criteria: Vec<Criteria>) -> Self {
        Self { criteria }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

/// A structured query against one table.
#[derive(Debug, Clone)]
pub struct Select {
    pub table: String,
    pub select: Vec<String>,
    pub where_groups: Vec<CriteriaSet>,
    pub order_by: Vec<Order>,
    pub limit: Option<i64>,
    pub params: HashMap<String, Scalar>,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: Vec::new(),
            where_groups: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            params: HashMap::new(),
        }
    }

    pub fn add_column(&mut self, column: impl Into<String>) -> &mut Self {
        self.select.push(column.into());
        self
    }

    pub fn add_where_group(&mut self, criteria: Vec<Criteria>) -> &mut Self {
        self.where_groups.push(criteria.into());
        self
    }

    pub fn add_order(&mut self, field: impl Into<String>, descending: bool) -> &mut Self {
        self.order_by.push(Order {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn set_limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn add_param(&mut self, name: impl Into<String>, value: impl Into<Scalar>) -> &mut Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

fn is_pseudo_column(name: &str) -> bool {
    matches!(name, "id" | "value" | "created" | "lastmodified" | "relevance")
}

fn query_err(msg: impl Into<String>) -> MetaStoreError {
    MetaStoreError::Query(msg.into())
}

/// Compile a structured query to SQL plus the bound parameters it references.
/// Deterministic for a given query; validation failures raise before any
/// identifier resolution touches the backing store.
pub fn generate_sql(store: &Store, query: &Select) -> Result<(String, SqlParams)> {
    validate_table_name(&query.table)?;
    if query.select.is_empty() {
        return Err(query_err("select list must not be empty"));
    }
    for column in &query.select {
        if !is_pseudo_column(column) {
            validate_column_name(column)?;
        }
    }
    let mut uses_matches = false;
    for group in &query.where_groups {
        for criteria in &group.criteria {
            let op = criteria.op.to_lowercase();
            if !OPERATORS.contains(&op.as_str()) {
                return Err(query_err(format!("invalid operator {}", criteria.op)));
            }
            if criteria.name == "relevance" {
                return Err(query_err("relevance cannot be used in a WHERE clause"));
            }
            if !is_pseudo_column(&criteria.name) {
                validate_column_name(&criteria.name)?;
            }
            validate_param_name(&criteria.param_name)?;
            if op == "matches" {
                if is_pseudo_column(&criteria.name) {
                    return Err(query_err("matches requires a long value field name"));
                }
                uses_matches = true;
            }
        }
    }
    if query.select.iter().any(|c| c == "relevance") && !uses_matches {
        return Err(query_err("relevance requires a matches predicate"));
    }
    // Ordering by relevance rides on the matches predicate, so it is the one
    // field allowed to order results without being selected.
    for order in &query.order_by {
        if order.field == "relevance" && uses_matches {
            continue;
        }
        if !query.select.iter().any(|c| c == &order.field) {
            return Err(query_err(format!(
                "ORDER BY column {} must appear in the select list",
                order.field
            )));
        }
    }

    // A table nobody has defined into yet is not an error; it just holds no
    // rows, and the projection shape stays stable.
    let Some(table_id) = store.table_id_no_create(&query.table)? else {
        let columns = query
            .select
            .iter()
            .map(|c| format!("NULL AS {}", c))
            .collect::<Vec<_>>()
            .join(", ");
        return Ok((format!("SELECT {} LIMIT 0", columns), Vec::new()));
    };
    let table = store.table_row(table_id)?;

    // Attribute usage, in order of first appearance, drives alias assignment.
    let mut uses_value_pseudo = false;
    let mut value_attrs: Vec<String> = Vec::new();
    let mut long_attrs: Vec<String> = Vec::new();
    fn note_attr(name: &str, uses_value_pseudo: &mut bool, attrs: &mut Vec<String>) {
        if name == "value" {
            *uses_value_pseudo = true;
        } else if !is_pseudo_column(name) && !attrs.iter().any(|a| a == name) {
            attrs.push(name.to_owned());
        }
    }
    for column in &query.select {
        note_attr(column, &mut uses_value_pseudo, &mut value_attrs);
    }
    for group in &query.where_groups {
        for criteria in &group.criteria {
            if criteria.op.to_lowercase() == "matches" {
                if !long_attrs.iter().any(|a| a == &criteria.name) {
                    long_attrs.push(criteria.name.clone());
                }
            } else {
                note_attr(&criteria.name, &mut uses_value_pseudo, &mut value_attrs);
            }
        }
    }

    let mut joins = String::new();
    if uses_value_pseudo {
        joins.push_str("\nJOIN bvalues bval ON bval.id = i.valueid");
    }
    let mut value_exprs: HashMap<String, String> = HashMap::new();
    for (n, name) in value_attrs.iter().enumerate() {
        match store.name_id_no_create(table_id, name)? {
            // Never-defined attribute: no join, null projection, never-true
            // predicate. The parameter stays referenced so binding succeeds.
            None => {
                value_exprs.insert(name.clone(), "NULL".to_owned());
            }
            Some(name_id) => {
                let name_row = store.name_row(name_id)?;
                let iv = format!("iv{}_{}", n, clean_name(name));
                let bv = format!("bv{}_{}", n, clean_name(name));
                joins.push_str(&format!(
                    "\nLEFT JOIN itemnamevalues {iv} ON {iv}.itemid = i.id AND {iv}.nameid = {name_id}"
                ));
                joins.push_str(&format!("\nLEFT JOIN bvalues {bv} ON {bv}.id = {iv}.valueid"));
                let column = if name_row.is_numeric {
                    "numberValue"
                } else {
                    "stringValue"
                };
                value_exprs.insert(name.clone(), format!("{bv}.{column}"));
            }
        }
    }
    let mut long_cols: HashMap<String, String> = HashMap::new();
    for (n, name) in long_attrs.iter().enumerate() {
        let ls = format!("ls{}_{}", n, clean_name(name));
        joins.push_str(&format!(
            "\nLEFT JOIN longstrings {ls} ON {ls}.itemid = i.id AND {ls}.name = '{name}'"
        ));
        long_cols.insert(name.clone(), format!("{ls}.longstring"));
    }

    let mut relevance_expr = None;
    'outer: for group in &query.where_groups {
        for criteria in &group.criteria {
            if criteria.op.to_lowercase() == "matches" {
                relevance_expr = Some(
                    store
                        .db
                        .relevance_expr(&long_cols[&criteria.name], &criteria.param_name),
                );
                break 'outer;
            }
        }
    }

    let key_column = if table.is_numeric {
        "bval.numberValue"
    } else {
        "bval.stringValue"
    };
    let expr_for = |name: &str| -> Result<String> {
        Ok(match name {
            "id" => "i.id".to_owned(),
            "value" => key_column.to_owned(),
            "created" => "i.created".to_owned(),
            "lastmodified" => "i.lastmodified".to_owned(),
            "relevance" => relevance_expr
                .clone()
                .ok_or_else(|| query_err("relevance requires a matches predicate"))?,
            attr => value_exprs
                .get(attr)
                .cloned()
                .ok_or_else(|| query_err(format!("unplanned column {}", attr)))?,
        })
    };

    let mut select_clause = String::new();
    for column in &query.select {
        if !select_clause.is_empty() {
            select_clause.push_str(", ");
        }
        select_clause.push_str(&format!("{} AS {}", expr_for(column)?, column));
    }

    let mut where_clause = format!("i.tableid = {}", table_id);
    let groups: Vec<&CriteriaSet> = query
        .where_groups
        .iter()
        .filter(|g| !g.criteria.is_empty())
        .collect();
    if !groups.is_empty() {
        let mut rendered = Vec::with_capacity(groups.len());
        for group in groups {
            let mut parts = Vec::with_capacity(group.criteria.len());
            for criteria in &group.criteria {
                let op = criteria.op.to_lowercase();
                let part = if op == "matches" {
                    store
                        .db
                        .matches_predicate(&long_cols[&criteria.name], &criteria.param_name)
                } else {
                    let sql_op = if op == "like" { "LIKE" } else { op.as_str() };
                    format!("{} {} {}", expr_for(&criteria.name)?, sql_op, criteria.param_name)
                };
                parts.push(part);
            }
            rendered.push(format!("({})", parts.join(" AND ")));
        }
        where_clause.push_str(&format!(" AND ({})", rendered.join(" OR ")));
    }

    let mut sql = format!(
        "SELECT {}\nFROM items AS i{}\nWHERE {}",
        select_clause, joins, where_clause
    );
    if !query.order_by.is_empty() {
        let mut orders = Vec::with_capacity(query.order_by.len());
        for order in &query.order_by {
            let direction = if order.descending { "DESC" } else { "ASC" };
            orders.push(format!("{} {}", expr_for(&order.field)?, direction));
        }
        sql.push_str(&format!("\nORDER BY {}", orders.join(", ")));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!("\nLIMIT {}", limit));
    }

    // Bind only the parameters the final SQL references; every referenced
    // parameter must have a value.
    let mut params: SqlParams = Vec::new();
    for name in extract_param_names(&sql) {
        let value = query
            .params
            .get(&name)
            .ok_or_else(|| query_err(format!("no value bound for parameter {}", name)))?;
        let sql_value = match value {
            Scalar::Number(n) => SqlValue::Real(*n),
            Scalar::Text(s) => SqlValue::Text(s.clone()),
        };
        params.push((name, sql_value));
    }
    Ok((sql, params))
}

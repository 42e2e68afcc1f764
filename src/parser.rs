//! A small textual front end for [`Select`]: a restricted SQL subset
//! (`SELECT cols FROM table [WHERE ...] [ORDER BY ...] [LIMIT n]`) parsed
//! into the structured query. Right-hand sides must be named parameters;
//! values are bound on the resulting [`Select`] afterwards.

use crate::error::{MetaStoreError, Result};
use crate::query::{Criteria, Order, Select, OPERATORS};
use crate::util::{is_param, validate_column_name, validate_table_name};

fn parse_err(msg: impl Into<String>) -> MetaStoreError {
    MetaStoreError::Parse(msg.into())
}

struct Tokens {
    tokens: Vec<String>,
    pos: usize,
}

impl Tokens {
    fn new(sql: &str) -> Self {
        // Commas separate list entries but need not be whitespace-delimited.
        let spaced = sql.replace(',', " , ");
        Self {
            tokens: spaced.split_whitespace().map(str::to_owned).collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<String> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        match self.next() {
            Some(token) if token.eq_ignore_ascii_case(keyword) => Ok(()),
            Some(token) => Err(parse_err(format!("expected {}, found {}", keyword, token))),
            None => Err(parse_err(format!("expected {}, found end of input", keyword))),
        }
    }

    fn accept_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.eq_ignore_ascii_case(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

/// Parse the textual query form. Parameter values are not part of the text;
/// bind them with [`Select::add_param`] before execution.
pub fn parse(sql: &str) -> Result<Select> {
    let mut tokens = Tokens::new(sql);
    tokens.expect_keyword("select")?;

    let mut columns = Vec::new();
    loop {
        let Some(token) = tokens.next() else {
            return Err(parse_err("expected FROM, found end of input"));
        };
        if token.eq_ignore_ascii_case("from") {
            break;
        }
        if token == "," {
            continue;
        }
        columns.push(token);
    }
    if columns.is_empty() {
        return Err(parse_err("select list must not be empty"));
    }

    let table = tokens
        .next()
        .ok_or_else(|| parse_err("expected a table name after FROM"))?;
    validate_table_name(&table)?;
    let mut select = Select::new(table);
    select.select = columns;

    if tokens.accept_keyword("where") {
        let mut criteria = Vec::new();
        loop {
            let name = tokens
                .next()
                .ok_or_else(|| parse_err("expected a column name in WHERE"))?;
            let op = tokens
                .next()
                .ok_or_else(|| parse_err(format!("expected an operator after {}", name)))?;
            let op_lower = op.to_lowercase();
            if !OPERATORS.contains(&op_lower.as_str()) {
                return Err(parse_err(format!("invalid operator {}", op)));
            }
            let rhs = tokens
                .next()
                .ok_or_else(|| parse_err(format!("expected a parameter after {} {}", name, op)))?;
            if !is_param(&rhs) {
                return Err(parse_err(format!(
                    "right-hand side must be a named parameter, found {}",
                    rhs
                )));
            }
            criteria.push(Criteria::new(name, op_lower, rhs));
            if !tokens.accept_keyword("and") {
                break;
            }
        }
        select.add_where_group(criteria);
    }

    if tokens.accept_keyword("order") {
        tokens.expect_keyword("by")?;
        loop {
            let field = tokens
                .next()
                .ok_or_else(|| parse_err("expected a column name in ORDER BY"))?;
            if field == "," {
                continue;
            }
            let descending = if tokens.accept_keyword("desc") {
                true
            } else {
                tokens.accept_keyword("asc");
                false
            };
            select.order_by.push(Order { field, descending });
            if tokens.peek() != Some(",") {
                break;
            }
        }
    }

    if tokens.accept_keyword("limit") {
        let value = tokens
            .next()
            .ok_or_else(|| parse_err("expected a row count after LIMIT"))?;
        let limit: i64 = value
            .parse()
            .map_err(|_| parse_err(format!("invalid LIMIT value {}", value)))?;
        if limit < 0 {
            return Err(parse_err(format!("LIMIT must not be negative: {}", limit)));
        }
        select.limit = Some(limit);
    }

    if let Some(extra) = tokens.peek() {
        return Err(parse_err(format!("unexpected trailing token {}", extra)));
    }

    // Column grammar is enforced here too, so bad queries fail before any
    // identifier resolution.
    for column in &select.select {
        if !matches!(
            column.as_str(),
            "id" | "value" | "created" | "lastmodified" | "relevance"
        ) {
            validate_column_name(column)?;
        }
    }
    Ok(select)
}

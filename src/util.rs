use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{MetaStoreError, Result};

/// The strict identifier grammar for user-supplied table, attribute and
/// parameter names: starts with a letter, then letters/digits/underscore,
/// must not end in an underscore.
pub const WORD_PATTERN: &str = r"^[a-zA-Z]\w*$";
pub const PARAM_PATTERN: &str = r"^@[a-zA-Z]\w*$";

lazy_static! {
    static ref IS_WORD: Regex = Regex::new(WORD_PATTERN).unwrap();
    static ref IS_PARAM: Regex = Regex::new(PARAM_PATTERN).unwrap();
}

/// Words with fixed meaning in the query surface; none of them may be used
/// as a table or attribute name.
pub const RESERVED_WORDS: [&str; 10] = [
    "select",
    "from",
    "where",
    "limit",
    "value",
    "id",
    "count",
    "created",
    "lastmodified",
    "relevance",
];

pub fn is_word(word: &str) -> bool {
    IS_WORD.is_match(word) && !word.ends_with('_')
}

pub fn is_param(param: &str) -> bool {
    IS_PARAM.is_match(param) && !param.ends_with('_')
}

pub fn is_reserved(name: &str) -> bool {
    let lowered = name.to_lowercase();
    RESERVED_WORDS.contains(&lowered.as_str())
}

pub fn validate_table_name(table: &str) -> Result<()> {
    validate_column_name(table)
}

pub fn validate_column_name(name: &str) -> Result<()> {
    if !is_word(name) {
        return Err(MetaStoreError::InvalidIdentifier(name.to_owned()));
    }
    if is_reserved(name) {
        return Err(MetaStoreError::ReservedIdentifier(name.to_owned()));
    }
    Ok(())
}

pub fn validate_param_name(param: &str) -> Result<()> {
    if !is_param(param) {
        return Err(MetaStoreError::InvalidParameter(param.to_owned()));
    }
    Ok(())
}

/// Strip a name down to letters and digits for use as a SQL alias, always
/// starting with a letter.
pub fn clean_name(name: &str) -> String {
    let mut clean: String = name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if clean.is_empty() || !clean.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        clean.insert(0, 'a');
    }
    clean
}

/// Pull every @param token out of a SQL string, in order of first appearance.
/// Used to bind only the parameters a generated statement actually uses.
pub fn extract_param_names(sql: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = sql.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '@' {
            continue;
        }
        let mut name = String::from("@");
        while let Some((_, n)) = chars.peek() {
            if n.is_ascii_alphanumeric() || *n == '_' {
                name.push(*n);
                chars.next();
            } else {
                break;
            }
        }
        if name.len() > 1 && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Bounded optimistic retry for get-or-create resolution. The closure reads
/// and, when allowed, inserts; `Ok(None)` means "lost a race, read again".
/// After the attempt bound the last failure is surfaced as a terminal error.
pub fn resolve_with_retries<T>(
    operation: &'static str,
    attempts: u32,
    mut op: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    let mut last_err = None;
    for _ in 0..attempts {
        match op() {
            Ok(Some(found)) => return Ok(found),
            Ok(None) => continue,
            Err(err) => last_err = Some(Box::new(err)),
        }
    }
    Err(MetaStoreError::ResolutionExhausted {
        operation,
        source: last_err,
    })
}

// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput};

// used to print out readable forms of a scalar
use std::fmt;
use std::hash::{Hash, Hasher};

/// The dynamic value carried through the store: a key or an attribute value
/// is either a number or a piece of text, decided at runtime. The variant is
/// what all type-consistency checks are made against; it is never widened to
/// a generic "any" internally.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Number(_))
    }
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(_) => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Number(_) => None,
            Scalar::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_owned())
    }
}
impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}
impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(n)
    }
}
impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Number(n as f64)
    }
}
impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Number(n as f64)
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Scalar::Number(n) => Ok(ToSqlOutput::from(*n)),
            Scalar::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

/// Hashable/comparable form of a scalar used as a cache key. Numbers key on
/// their bit pattern, so only values that compare equal bit-for-bit share an
/// entry; the interner itself remains the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarKey {
    Number(u64),
    Text(String),
}

impl From<&Scalar> for ScalarKey {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Number(n) => ScalarKey::Number(n.to_bits()),
            Scalar::Text(s) => ScalarKey::Text(s.clone()),
        }
    }
}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ScalarKey::from(self).hash(state);
    }
}

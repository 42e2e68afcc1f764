use thiserror::Error;

/// Error taxonomy for the store. Type mismatches and invalid identifiers are
/// rejected before any write reaches the backing engine; resolution
/// exhaustion wraps the last backend failure after the bounded retry loop
/// gives up.
#[derive(Error, Debug)]
pub enum MetaStoreError {
    #[error(
        "Key numeric does not match table configuration: {table}\n - table numeric: {table_is_numeric}\n - key numeric: {key_is_numeric} - {key}"
    )]
    TableTypeMismatch {
        table: String,
        table_is_numeric: bool,
        key_is_numeric: bool,
        key: String,
    },
    #[error(
        "Value numeric does not match name: {name}\n - value is numeric: {value_is_numeric} - {value}\n - name is numeric: {name_is_numeric}"
    )]
    NameTypeMismatch {
        name: String,
        name_is_numeric: bool,
        value_is_numeric: bool,
        value: String,
    },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Reserved identifier: {0}")]
    ReservedIdentifier(String),
    #[error("Invalid parameter name: {0}")]
    InvalidParameter(String),
    #[error("{operation} failed after a few tries")]
    ResolutionExhausted {
        operation: &'static str,
        #[source]
        source: Option<Box<MetaStoreError>>,
    },
    #[error("{operation} found no matching record: {target}")]
    NotFound { operation: &'static str, target: String },
    #[error("Size limit exceeded: {0}")]
    SizeExceeded(String),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Backing store error: {0}")]
    Backend(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, MetaStoreError>;

// Helper conversions
impl From<rusqlite::Error> for MetaStoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

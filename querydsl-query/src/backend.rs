use async_trait::async_trait;
use querydsl_core::{Result, Value};

/// A generated statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params }
    }
}

/// A value exactly as the backend driver scanned it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    /// Text as raw bytes; drivers are not required to validate encoding.
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

/// Column metadata reported for a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type of the column, if the backend knows it.
    pub decl_type: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, decl_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            decl_type: decl_type.map(str::to_string),
        }
    }
}

/// Fully materialized rows of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<RawValue>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Connection to a relational store.
///
/// Implementations must be safe to share between concurrent requests and must
/// stop the in-flight statement when the returned future is dropped.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a statement that yields rows (SELECT, or a mutation with RETURNING).
    async fn query(&self, statement: &Statement) -> Result<ResultSet>;

    /// Run a statement for its side effect and report the affected row count.
    async fn execute(&self, statement: &Statement) -> Result<u64>;
}

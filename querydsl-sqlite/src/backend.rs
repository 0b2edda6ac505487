use async_trait::async_trait;
use parking_lot::Mutex;
use querydsl_core::{Error, Result, Value};
use querydsl_query::{Backend, ColumnInfo, RawValue, ResultSet, Statement};
use rusqlite::config::DbConfig;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, InterruptHandle};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// SQLite connection shared by every request of one executor.
///
/// Statements run one at a time on tokio's blocking pool. Dropping a pending
/// call interrupts its statement, or keeps it from starting if still queued.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteBackend {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::backend("open", e))?;
        debug!("Opened in-memory SQLite database");
        Self::from_connection(conn)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| Error::backend("open", format!("{}: {}", path.display(), e)))?;
        debug!("Opened SQLite database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Wrap an existing connection.
    ///
    /// Double-quoted strings are switched off so a quoted identifier that names
    /// no column is an error instead of a string literal.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)
            .and_then(|_| conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false))
            .map_err(|e| Error::backend("open", e))?;

        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }

    /// Run several semicolon-separated statements, e.g. schema setup.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.run("execute_batch", move |conn| conn.execute_batch(&sql)).await
    }

    async fn run<T, F>(&self, context: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let guard = CallGuard::new(self.interrupt.clone());
        let phase = guard.phase.clone();
        let conn = self.conn.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            {
                let mut phase = phase.lock();
                if *phase == Phase::Cancelled {
                    return Err(Error::Cancelled);
                }
                *phase = Phase::Running;
            }
            let result = work(&conn);
            *phase.lock() = Phase::Done;
            result.map_err(|e| map_error(context, e))
        })
        .await
        .map_err(|e| Error::backend(context, format!("worker failed: {}", e)))?;

        drop(guard);
        outcome
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn query(&self, statement: &Statement) -> Result<ResultSet> {
        let sql = statement.sql.clone();
        let params = bind_params(&statement.params)?;

        self.run("query", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<ColumnInfo> = stmt
                .columns()
                .iter()
                .map(|column| ColumnInfo::new(column.name(), column.decl_type()))
                .collect();

            let mut rows = stmt.query(params_from_iter(params))?;
            let mut raw_rows = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns.len());
                for index in 0..columns.len() {
                    values.push(raw_value(row.get_ref(index)?));
                }
                raw_rows.push(values);
            }
            Ok(ResultSet { columns, rows: raw_rows })
        })
        .await
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let sql = statement.sql.clone();
        let params = bind_params(&statement.params)?;

        let affected = self
            .run("execute", move |conn| conn.execute(&sql, params_from_iter(params)))
            .await?;
        Ok(affected as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Done,
    Cancelled,
}

/// Cancels the statement of one call when the awaiting future goes away.
struct CallGuard {
    phase: Arc<Mutex<Phase>>,
    interrupt: Arc<InterruptHandle>,
}

impl CallGuard {
    fn new(interrupt: Arc<InterruptHandle>) -> Self {
        Self {
            phase: Arc::new(Mutex::new(Phase::Pending)),
            interrupt,
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Pending => *phase = Phase::Cancelled,
            Phase::Running => {
                warn!("Interrupting running SQLite statement");
                self.interrupt.interrupt();
                *phase = Phase::Cancelled;
            }
            Phase::Done | Phase::Cancelled => {}
        }
    }
}

fn map_error(context: &str, error: rusqlite::Error) -> Error {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::OperationInterrupted => {
            Error::Cancelled
        }
        _ => Error::backend(context, error),
    }
}

fn bind_params(params: &[Value]) -> Result<Vec<SqlValue>> {
    params.iter().map(bind_value).collect()
}

fn bind_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
        Value::List(_) => {
            return Err(Error::malformed(
                "list values can only be used with the in/nin operators",
            ))
        }
    })
}

fn raw_value(value: ValueRef<'_>) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(v) => RawValue::Integer(v),
        ValueRef::Real(v) => RawValue::Real(v),
        ValueRef::Text(bytes) => RawValue::Text(bytes.to_vec()),
        ValueRef::Blob(bytes) => RawValue::Blob(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, active BOOLEAN, score REAL);
                 INSERT INTO t VALUES (1, 'a', 1, 1.5), (2, 'b', 0, NULL);",
            )
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_query_reports_declared_types() {
        let backend = backend().await;
        let result = backend
            .query(&Statement::new("SELECT * FROM t ORDER BY id", Vec::new()))
            .await
            .unwrap();

        let types: Vec<_> = result.columns.iter().map(|c| c.decl_type.as_deref()).collect();
        assert_eq!(types, vec![Some("INTEGER"), Some("TEXT"), Some("BOOLEAN"), Some("REAL")]);
        assert_eq!(result.rows[0][1], RawValue::Text(b"a".to_vec()));
        assert_eq!(result.rows[1][3], RawValue::Null);
    }

    #[tokio::test]
    async fn test_parameters_are_bound() {
        let backend = backend().await;
        let stmt = Statement::new("SELECT id FROM t WHERE active = ? AND name = ?", vec![Value::Bool(true), Value::from("a")]);
        let result = backend.query(&stmt).await.unwrap();
        assert_eq!(result.rows, vec![vec![RawValue::Integer(1)]]);
    }

    #[tokio::test]
    async fn test_execute_counts_rows() {
        let backend = backend().await;
        let stmt = Statement::new("UPDATE t SET score = ?", vec![Value::Float(2.0)]);
        assert_eq!(backend.execute(&stmt).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_syntax_error_is_wrapped() {
        let backend = backend().await;
        let err = backend.query(&Statement::new("SELEC nonsense", Vec::new())).await.unwrap_err();
        assert!(matches!(err, Error::Backend { ref context, .. } if context == "query"));
    }

    #[tokio::test]
    async fn test_unknown_quoted_identifier_is_an_error() {
        let backend = backend().await;
        let stmt = Statement::new("SELECT \"missing\" FROM t", Vec::new());
        assert!(matches!(backend.query(&stmt).await, Err(Error::Backend { .. })));
    }

    #[tokio::test]
    async fn test_list_parameter_is_rejected() {
        let backend = backend().await;
        let stmt = Statement::new("SELECT ?", vec![Value::from(vec![1, 2])]);
        assert!(matches!(backend.query(&stmt).await, Err(Error::MalformedRequest(_))));
    }

    #[tokio::test]
    async fn test_backend_usable_after_cancelled_call() {
        let backend = backend().await;
        let slow = Statement::new(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 20000000) SELECT count(*) FROM c",
            Vec::new(),
        );
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), backend.query(&slow)).await;
        assert!(outcome.is_err());

        let result = backend.query(&Statement::new("SELECT count(*) FROM t", Vec::new())).await.unwrap();
        assert_eq!(result.rows, vec![vec![RawValue::Integer(2)]]);
    }
}

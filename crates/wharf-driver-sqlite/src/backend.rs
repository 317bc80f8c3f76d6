//! rusqlite-backed session

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use wharf_core::{
    Backend, ConnectionFactory, ExecuteResult, QueryResult, Result, Row, Value, WharfError,
};

pub const MEMORY_TARGET: &str = ":memory:";

/// One SQLite session
///
/// Statements run synchronously under the session lock; SQLite calls are
/// short enough that the pool's own concurrency is the bottleneck.
pub struct SqliteBackend {
    conn: Mutex<Option<RusqliteConnection>>,
    path: String,
}

impl SqliteBackend {
    /// Open a database file, or a private in-memory database for `:memory:`
    pub fn open(path: &str) -> Result<Self> {
        tracing::debug!(path = %path, "opening SQLite database");

        let conn = if path == MEMORY_TARGET {
            RusqliteConnection::open_in_memory().map_err(|e| {
                WharfError::backend("open", format!("failed to open in-memory database: {e}"))
            })?
        } else {
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            let conn = RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
                WharfError::backend("open", format!("failed to open '{path}': {e}"))
            })?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| WharfError::backend("open", format!("failed to set journal mode: {e}")))?;
            conn
        };

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| WharfError::backend("open", format!("failed to enable foreign keys: {e}")))?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn with_conn<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&RusqliteConnection) -> Result<T>,
    ) -> Result<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(WharfError::backend(operation, "connection is closed")),
        }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.with_conn("query", |conn| {
            let failed = |e: rusqlite::Error| WharfError::backend_with_sql("query", sql, e.to_string());

            let mut stmt = conn.prepare(sql).map_err(failed)?;
            let (columns, rows) = collect_rows(&mut stmt, params).map_err(failed)?;

            tracing::debug!(row_count = rows.len(), "query executed");
            Ok(QueryResult::new(columns, rows))
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        self.with_conn("execute", |conn| {
            let failed = |e: rusqlite::Error| WharfError::backend_with_sql("execute", sql, e.to_string());

            let mut stmt = conn.prepare(sql).map_err(failed)?;
            // RETURNING yields one row per modified row
            let (affected, rows) = if stmt.column_count() > 0 {
                let (_, rows) = collect_rows(&mut stmt, params).map_err(failed)?;
                (rows.len(), rows)
            } else {
                let affected = stmt
                    .execute(params_from_iter(params.iter().map(value_to_rusqlite)))
                    .map_err(failed)?;
                (affected, Vec::new())
            };

            let mut result = ExecuteResult::affected(affected as u64).with_rows(rows);
            if affected > 0 && is_insert(sql) {
                result = result.with_insert_id(conn.last_insert_rowid());
            }
            tracing::debug!(affected_rows = affected, "statement executed");
            Ok(result)
        })
    }

    async fn begin(&self) -> Result<()> {
        // DEFERRED takes the write lock only at the first write
        self.with_conn("begin", |conn| {
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| WharfError::backend("begin", e.to_string()))
        })
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => {
                tracing::debug!(path = %self.path, "closing SQLite connection");
                conn.close()
                    .map_err(|(_, e)| WharfError::backend("close", e.to_string()))
            }
            None => Ok(()),
        }
    }
}

fn collect_rows(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[Value],
) -> rusqlite::Result<(Vec<String>, Vec<Row>)> {
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    let mut cursor = stmt.query(params_from_iter(params.iter().map(value_to_rusqlite)))?;
    while let Some(row) = cursor.next()? {
        let values = (0..columns.len())
            .map(|idx| row.get_ref(idx).map(value_from_rusqlite))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.push(Row::new(columns.clone(), values));
    }
    Ok((columns, rows))
}

fn is_insert(sql: &str) -> bool {
    let head = sql.trim_start();
    ["INSERT", "REPLACE"].iter().any(|keyword| {
        head.get(..keyword.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
    })
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Int64(i) => Sql::Integer(*i),
        Value::Float64(f) => Sql::Real(*f),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::DateTime(dt) => Sql::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => Sql::Text(dt.to_rfc3339()),
        Value::Json(j) => Sql::Text(j.to_string()),
    }
}

fn value_from_rusqlite(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

/// Opens a new [`SqliteBackend`] per call
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    path: String,
}

impl SqliteFactory {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_memory() -> Self {
        Self::new(MEMORY_TARGET)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl ConnectionFactory for SqliteFactory {
    async fn create(&self) -> Result<Box<dyn Backend>> {
        Ok(Box::new(SqliteBackend::open(&self.path)?))
    }
}

//! SQL 执行与简要分析
//!
//! 服务端模式：每次执行在阻塞线程中新开 SQLite 连接，限时运行，行转为 JSON 对象并附上分析文字。
//! 客户端模式：不打开任何连接，返回固定的「执行已禁用」结果。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{ffi, Connection, InterruptHandle, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::core::ExecutionMode;

/// 一行结果：列名 → 值
pub type SqlRow = Map<String, Value>;

pub const EXECUTION_DISABLED_ANALYSIS: &str = "Server-side execution disabled; please run this query against your own database and get the results";

/// 执行结果（返回给 Agent 的 JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub sql_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SqlRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub analysis: String,
}

fn round_secs(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

impl QueryResult {
    pub fn from_rows(sql: &str, rows: Vec<SqlRow>, elapsed_secs: f64) -> Self {
        let count = rows.len();
        let (message, analysis) = if count == 0 {
            (
                Some("Query executed successfully but returned no results".to_string()),
                "No data matches the query criteria. Consider checking if data exists or modifying query conditions."
                    .to_string(),
            )
        } else {
            let shape = match count {
                1 => "This appears to be a specific lookup query.",
                c if c > 10 => "This query returned a substantial dataset suitable for analysis.",
                _ => "This query returned a focused dataset.",
            };
            (None, format!("Successfully retrieved {count} records. {shape}"))
        };
        Self {
            success: true,
            sql_query: sql.to_string(),
            results: Some(rows),
            row_count: Some(count),
            execution_time_seconds: Some(round_secs(elapsed_secs)),
            message,
            error: None,
            analysis,
        }
    }

    pub fn failed(sql: &str, error: impl Into<String>, elapsed_secs: f64) -> Self {
        let error = error.into();
        Self {
            success: false,
            sql_query: sql.to_string(),
            results: None,
            row_count: None,
            execution_time_seconds: Some(round_secs(elapsed_secs)),
            message: None,
            analysis: format!("Query execution failed: {error}"),
            error: Some(error),
        }
    }

    /// 客户端模式的固定结果
    pub fn execution_disabled(sql: &str) -> Self {
        Self {
            success: false,
            sql_query: sql.to_string(),
            results: None,
            row_count: None,
            execution_time_seconds: None,
            message: None,
            error: None,
            analysis: EXECUTION_DISABLED_ANALYSIS.to_string(),
        }
    }

    /// 未通过置信度门槛、被拒绝执行
    pub fn refused(sql: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            success: false,
            sql_query: sql.to_string(),
            results: None,
            row_count: None,
            execution_time_seconds: None,
            message: None,
            analysis: format!(
                "Execution refused: {reason}. Review the query with reflect_on_sql and revise it until the verdict passes."
            ),
            error: Some(reason),
        }
    }
}

/// 超时后等待被中断的查询释放连接的最长时间
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// 执行线程与调用方共享的中断句柄
#[derive(Default)]
enum InterruptSlot {
    #[default]
    Pending,
    Ready(InterruptHandle),
    Cancelled,
}

type SharedInterrupt = Arc<Mutex<InterruptSlot>>;

/// 超时：中断正在运行的语句；连接尚未打开时标记取消
fn cancel(slot: &SharedInterrupt) {
    let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
    if let InterruptSlot::Ready(handle) = &*guard {
        handle.interrupt();
    }
    *guard = InterruptSlot::Cancelled;
}

/// 服务端数据库执行器
#[derive(Debug, Clone)]
pub struct DatabaseExecutor {
    path: PathBuf,
    query_timeout: Duration,
    connections_opened: Arc<AtomicUsize>,
}

impl DatabaseExecutor {
    pub fn new(path: impl Into<PathBuf>, query_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            query_timeout,
            connections_opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// 执行 SQL；失败、超时均转为 success=false 的结果
    pub async fn execute(&self, sql: &str) -> QueryResult {
        let start = Instant::now();
        let path = self.path.clone();
        let query = sql.to_string();
        let counter = Arc::clone(&self.connections_opened);
        let slot = SharedInterrupt::default();
        let worker_slot = Arc::clone(&slot);
        let mut task =
            tokio::task::spawn_blocking(move || run_query(&path, &query, &counter, &worker_slot));

        let outcome = match tokio::time::timeout(self.query_timeout, &mut task).await {
            Ok(Ok(Ok(rows))) => Ok(rows),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join)) => Err(format!("database worker failed: {join}")),
            Err(_) => {
                cancel(&slot);
                // 等待工作线程退出，连接随之关闭
                if tokio::time::timeout(INTERRUPT_GRACE, task).await.is_err() {
                    tracing::error!(sql, "interrupted query did not stop in time");
                }
                Err(format!(
                    "query timed out after {} seconds",
                    self.query_timeout.as_secs()
                ))
            }
        };
        let elapsed = start.elapsed().as_secs_f64();
        match outcome {
            Ok(rows) => {
                tracing::info!(rows = rows.len(), elapsed_secs = elapsed, "query executed");
                QueryResult::from_rows(sql, rows, elapsed)
            }
            Err(e) => {
                tracing::warn!(error = %e, sql, "query failed");
                QueryResult::failed(sql, e, elapsed)
            }
        }
    }

    /// 连通性检查（SELECT 1）
    pub async fn ping(&self) -> bool {
        self.execute("SELECT 1").await.success
    }
}

/// 列标签：空名时单列为 `value`，多列为 `col_{idx}`
pub fn column_labels(names: &[String]) -> Vec<String> {
    let single = names.len() == 1;
    names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if !name.trim().is_empty() {
                name.clone()
            } else if single {
                "value".to_string()
            } else {
                format!("col_{idx}")
            }
        })
        .collect()
}

fn is_decimal_type(decl: &str) -> bool {
    let upper = decl.to_ascii_uppercase();
    ["DECIMAL", "NUMERIC", "MONEY"].iter().any(|t| upper.contains(t))
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn to_json_value(value: ValueRef<'_>, decimal: bool) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if decimal => float_value(i as f64),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => float_value(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match text.trim().parse::<f64>() {
                Ok(f) if decimal => float_value(f),
                _ => Value::String(text),
            }
        }
        ValueRef::Blob(bytes) => Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
    }
}

fn run_query(
    path: &Path,
    sql: &str,
    counter: &AtomicUsize,
    slot: &SharedInterrupt,
) -> rusqlite::Result<Vec<SqlRow>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    counter.fetch_add(1, Ordering::Relaxed);
    {
        let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
        if matches!(*guard, InterruptSlot::Cancelled) {
            return Err(rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_INTERRUPT),
                Some("query cancelled before it started".to_string()),
            ));
        }
        *guard = InterruptSlot::Ready(conn.get_interrupt_handle());
    }
    conn.busy_timeout(Duration::from_secs(5))?;

    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let labels = column_labels(&names);
    let decimal: Vec<bool> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().map(is_decimal_type).unwrap_or(false))
        .collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = SqlRow::new();
        for (idx, label) in labels.iter().enumerate() {
            let value = row.get_ref(idx)?;
            obj.insert(label.clone(), to_json_value(value, decimal[idx]));
        }
        out.push(obj);
    }
    Ok(out)
}

/// 按部署模式选择的执行器
#[derive(Debug, Clone)]
pub enum SqlExecutor {
    ServerSide(DatabaseExecutor),
    ClientSide,
}

impl SqlExecutor {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            SqlExecutor::ServerSide(_) => ExecutionMode::ServerSide,
            SqlExecutor::ClientSide => ExecutionMode::ClientSide,
        }
    }

    pub async fn execute(&self, sql: &str) -> QueryResult {
        match self {
            SqlExecutor::ServerSide(db) => db.execute(sql).await,
            SqlExecutor::ClientSide => QueryResult::execution_disabled(sql),
        }
    }

    /// 客户端模式无数据库，返回 None
    pub async fn ping(&self) -> Option<bool> {
        match self {
            SqlExecutor::ServerSide(db) => Some(db.ping().await),
            SqlExecutor::ClientSide => None,
        }
    }

    pub fn connections_opened(&self) -> usize {
        match self {
            SqlExecutor::ServerSide(db) => db.connections_opened(),
            SqlExecutor::ClientSide => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_db() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price DECIMAL(10,2), image BLOB);
             INSERT INTO products (name, price, image) VALUES ('pen', 5, x'0aff');
             INSERT INTO products (name, price, image) VALUES ('book', '19.99', NULL);",
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn test_column_labels() {
        assert_eq!(column_labels(&["".to_string()]), vec!["value"]);
        assert_eq!(
            column_labels(&["a".to_string(), " ".to_string(), "c".to_string()]),
            vec!["a", "col_1", "c"]
        );
    }

    #[test]
    fn test_analysis_buckets() {
        let row = |i: i64| {
            let mut r = SqlRow::new();
            r.insert("id".into(), Value::from(i));
            r
        };
        let one = QueryResult::from_rows("q", vec![row(1)], 0.0);
        assert!(one.analysis.ends_with("specific lookup query."));
        let few = QueryResult::from_rows("q", (0..5).map(row).collect(), 0.0);
        assert!(few.analysis.ends_with("focused dataset."));
        let many = QueryResult::from_rows("q", (0..11).map(row).collect(), 0.0);
        assert_eq!(
            many.analysis,
            "Successfully retrieved 11 records. This query returned a substantial dataset suitable for analysis."
        );
    }

    #[test]
    fn test_empty_result_message() {
        let r = QueryResult::from_rows("q", Vec::new(), 0.12345);
        assert!(r.success);
        assert_eq!(r.row_count, Some(0));
        assert_eq!(r.execution_time_seconds, Some(0.123));
        assert!(r.message.is_some());
        assert!(r.analysis.starts_with("No data matches"));
    }

    #[tokio::test]
    async fn test_execute_converts_values() {
        let (_dir, path) = sample_db();
        let db = DatabaseExecutor::new(&path, Duration::from_secs(5));
        let r = db.execute("SELECT name, price, image FROM products ORDER BY id").await;
        assert!(r.success, "{:?}", r.error);
        assert_eq!(r.row_count, Some(2));
        let rows = r.results.unwrap();
        assert_eq!(rows[0]["name"], "pen");
        assert!(rows[0]["price"].is_f64());
        assert_eq!(rows[0]["price"].as_f64(), Some(5.0));
        assert_eq!(rows[1]["price"].as_f64(), Some(19.99));
        assert_eq!(rows[0]["image"], "0aff");
        assert!(rows[1]["image"].is_null());
        assert_eq!(db.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_execute_reports_sql_error() {
        let (_dir, path) = sample_db();
        let db = DatabaseExecutor::new(&path, Duration::from_secs(5));
        let r = db.execute("SELECT * FROM missing_table").await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("missing_table"));
        assert!(r.analysis.starts_with("Query execution failed: "));
        assert!(r.execution_time_seconds.is_some());
    }

    #[tokio::test]
    async fn test_execute_names_unlabeled_columns() {
        let (_dir, path) = sample_db();
        let db = DatabaseExecutor::new(&path, Duration::from_secs(5));

        let single = db.execute("SELECT 1 AS \"\"").await;
        assert!(single.success, "{:?}", single.error);
        let rows = single.results.unwrap();
        assert_eq!(rows[0]["value"], 1);
        assert_eq!(rows[0].len(), 1);

        let pair = db.execute("SELECT 1 AS \"\", 'x' AS \"\"").await;
        assert!(pair.success, "{:?}", pair.error);
        let rows = pair.results.unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["col_0", "col_1"]);
        assert_eq!(rows[0]["col_1"], "x");
    }

    #[tokio::test]
    async fn test_timeout_interrupts_query_and_releases_connection() {
        let (_dir, path) = sample_db();
        let db = DatabaseExecutor::new(&path, Duration::from_secs(1));
        let r = db
            .execute(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                 SELECT count(*) FROM products, c",
            )
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("timed out"));

        let conn = Connection::open(&path).unwrap();
        conn.busy_timeout(Duration::ZERO).unwrap();
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;").unwrap();
    }

    #[tokio::test]
    async fn test_missing_database_file_is_failure() {
        let dir = TempDir::new().unwrap();
        let db = DatabaseExecutor::new(dir.path().join("nope.db"), Duration::from_secs(5));
        assert!(!db.ping().await);
        assert!(!dir.path().join("nope.db").exists());
    }

    #[tokio::test]
    async fn test_client_side_never_connects() {
        let exec = SqlExecutor::ClientSide;
        let r = exec.execute("SELECT * FROM customers").await;
        assert!(!r.success);
        assert_eq!(r.analysis, EXECUTION_DISABLED_ANALYSIS);
        assert!(r.results.is_none());
        assert_eq!(exec.ping().await, None);
        assert_eq!(exec.connections_opened(), 0);
    }

    #[test]
    fn test_serialized_shape_omits_absent_fields() {
        let v = serde_json::to_value(QueryResult::execution_disabled("SELECT 1")).unwrap();
        assert!(v.get("results").is_none());
        assert!(v.get("error").is_none());
        assert_eq!(v["sql_query"], "SELECT 1");
    }
}

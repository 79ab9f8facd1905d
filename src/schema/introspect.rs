//! SQLite 结构自省：表、列（类型、可空）与少量样例行

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

/// 每张表读取的样例行数
pub const SAMPLE_ROWS: usize = 3;
/// 写入检索文档的样例行数
const DOCUMENT_SAMPLES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub samples: Vec<Vec<String>>,
}

impl TableInfo {
    /// 检索文档：表名、列清单与前两行样例
    pub fn document(&self) -> String {
        let mut doc = format!("Table: {}\n\nColumns:\n", self.name);
        for c in &self.columns {
            doc.push_str(&format!("- {} ({}, nullable={})\n", c.name, c.data_type, c.nullable));
        }
        doc.push_str("\nSample Rows:\n");
        for row in self.samples.iter().take(DOCUMENT_SAMPLES) {
            doc.push_str(&format!("({})\n", row.join(", ")));
        }
        doc.trim_end().to_string()
    }
}

/// 完整结构文本：每表一段 `Table: t` + `- col (TYPE)` 行
pub fn schema_text(tables: &[TableInfo]) -> String {
    let mut text = String::from("Database Schema:\n");
    for t in tables {
        text.push_str(&format!("\nTable: {}\n", t.name));
        for c in &t.columns {
            text.push_str(&format!("- {} ({})\n", c.name, c.data_type));
        }
    }
    text
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sample_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => format!("'{}'", String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => format!("<blob {} bytes>", bytes.len()),
    }
}

fn describe_table(conn: &Connection, name: &str) -> rusqlite::Result<TableInfo> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
    let columns = stmt
        .query_map([], |row| {
            let data_type: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            Ok(ColumnInfo {
                name: row.get(1)?,
                data_type: if data_type.is_empty() { "ANY".to_string() } else { data_type },
                nullable: not_null == 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!("SELECT * FROM {} LIMIT {SAMPLE_ROWS}", quote_ident(name)))?;
    let width = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut samples = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(sample_text(row.get_ref(idx)?));
        }
        samples.push(values);
    }

    Ok(TableInfo {
        name: name.to_string(),
        columns,
        samples,
    })
}

/// 以只读方式打开数据库并描述全部用户表与视图（跳过 `_xlnm` 开头的表）
pub fn introspect(path: &Path) -> rusqlite::Result<Vec<TableInfo>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    names
        .iter()
        .filter(|n| !n.starts_with("_xlnm"))
        .map(|n| describe_table(&conn, n))
        .collect()
}

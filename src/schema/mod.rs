//! 结构提供者：为 SQL 生成提供与问题相关的数据库结构描述
//!
//! 两种形态在启动时选定：
//! - RetrievalBacked：服务端模式下自省数据库、构建向量索引，按问题检索 top-k 表文档
//! - StaticText：客户端模式（或无法自省、无嵌入服务时）使用固定文本

pub mod index;
pub mod introspect;
pub mod static_text;

use std::path::Path;
use std::sync::Arc;

pub use index::{cosine_similarity, IndexedDocument, SchemaIndex};
pub use introspect::{introspect, schema_text, ColumnInfo, TableInfo};
pub use static_text::{builtin_schema, load_static_schema};

use crate::config::SchemaSection;
use crate::core::{AgentError, ExecutionMode};
use crate::llm::EmbeddingProvider;

/// 检索形态：索引 + 嵌入器 + 完整结构文本（检索失败时的兜底）
pub struct RetrievalSchema {
    index: SchemaIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    full_text: String,
    top_k: usize,
}

pub enum SchemaProvider {
    RetrievalBacked(RetrievalSchema),
    StaticText(String),
}

impl SchemaProvider {
    pub fn static_text(text: impl Into<String>) -> Self {
        SchemaProvider::StaticText(text.into())
    }

    pub fn retrieval(
        index: SchemaIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        full_text: impl Into<String>,
        top_k: usize,
    ) -> Self {
        SchemaProvider::RetrievalBacked(RetrievalSchema {
            index,
            embedder,
            full_text: full_text.into(),
            top_k: top_k.max(1),
        })
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            SchemaProvider::RetrievalBacked(_) => "retrieval",
            SchemaProvider::StaticText(_) => "static",
        }
    }

    /// 完整结构文本（反思时使用）
    pub fn full_text(&self) -> &str {
        match self {
            SchemaProvider::RetrievalBacked(r) => &r.full_text,
            SchemaProvider::StaticText(text) => text,
        }
    }

    /// 与问题相关的结构描述；检索失败或无命中时退回完整文本
    pub async fn provide(&self, question: &str) -> String {
        let SchemaProvider::RetrievalBacked(r) = self else {
            return self.full_text().to_string();
        };
        match r.embedder.embed(question).await {
            Ok(query) if !query.is_empty() => {
                let hits = r.index.search(&query, r.top_k);
                if hits.is_empty() {
                    return r.full_text.clone();
                }
                tracing::debug!(tables = ?hits.iter().map(|d| d.table.as_str()).collect::<Vec<_>>(), "schema retrieval");
                hits.iter()
                    .map(|d| d.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
            Ok(_) => r.full_text.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "schema retrieval failed, using full schema");
                r.full_text.clone()
            }
        }
    }

    /// 按部署模式构建：客户端模式用静态文本；服务端模式自省数据库，有嵌入器时建索引
    pub async fn for_mode(
        mode: ExecutionMode,
        database: &Path,
        cfg: &SchemaSection,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self, AgentError> {
        let static_fallback = || Self::static_text(load_static_schema(cfg.static_schema_path.as_deref()));
        if !mode.allows_execution() {
            return Ok(static_fallback());
        }

        let path = database.to_path_buf();
        let tables = match tokio::task::spawn_blocking(move || introspect(&path)).await {
            Ok(Ok(tables)) => tables,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, db = %database.display(), "schema introspection failed, using static schema");
                return Ok(static_fallback());
            }
            Err(e) => return Err(AgentError::Database(format!("introspection worker failed: {e}"))),
        };
        if tables.is_empty() {
            tracing::warn!(db = %database.display(), "database has no tables, using static schema");
            return Ok(static_fallback());
        }

        let full_text = schema_text(&tables);
        let Some(embedder) = embedder else {
            tracing::info!(tables = tables.len(), "no embedding provider, using full introspected schema");
            return Ok(Self::static_text(full_text));
        };
        match SchemaIndex::load_or_build(&cfg.index_path, &tables, embedder.as_ref()).await {
            Ok(index) => Ok(Self::retrieval(index, embedder, full_text, cfg.top_k)),
            Err(e) => {
                tracing::warn!(error = %e, "schema index unavailable, using full introspected schema");
                Ok(Self::static_text(full_text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::index::tests::{table, KeywordEmbedder};
    use tempfile::TempDir;

    fn schema_cfg(dir: &TempDir) -> SchemaSection {
        SchemaSection {
            index_path: dir.path().join("schema_index.json"),
            top_k: 1,
            static_schema_path: None,
        }
    }

    #[tokio::test]
    async fn test_retrieval_is_idempotent_and_relevant() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder::new("m"));
        let tables = [table("orders"), table("customers")];
        let index = SchemaIndex::build(&tables, embedder.as_ref()).await.unwrap();
        let provider = SchemaProvider::retrieval(index, embedder, schema_text(&tables), 1);
        let a = provider.provide("How many customers are there?").await;
        let b = provider.provide("How many customers are there?").await;
        assert_eq!(a, b);
        assert!(a.starts_with("Table: customers"));
        assert!(provider.full_text().contains("Table: orders"));
    }

    #[tokio::test]
    async fn test_client_side_uses_static_text() {
        let dir = TempDir::new().unwrap();
        let provider = SchemaProvider::for_mode(
            ExecutionMode::ClientSide,
            &dir.path().join("unused.db"),
            &schema_cfg(&dir),
            None,
        )
        .await
        .unwrap();
        assert_eq!(provider.variant_name(), "static");
        assert_eq!(provider.provide("anything").await, builtin_schema());
    }

    #[tokio::test]
    async fn test_empty_database_falls_back_to_static() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("empty.db");
        rusqlite::Connection::open(&db).unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder::new("m"));
        let provider = SchemaProvider::for_mode(ExecutionMode::ServerSide, &db, &schema_cfg(&dir), Some(embedder))
            .await
            .unwrap();
        assert_eq!(provider.full_text(), builtin_schema());
    }

    #[tokio::test]
    async fn test_server_side_builds_index() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("bi.db");
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER, name TEXT); CREATE TABLE orders (id INTEGER, total REAL);",
        )
        .unwrap();
        let cfg = schema_cfg(&dir);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder::new("m"));
        let provider = SchemaProvider::for_mode(ExecutionMode::ServerSide, &db, &cfg, Some(embedder))
            .await
            .unwrap();
        assert_eq!(provider.variant_name(), "retrieval");
        assert!(cfg.index_path.exists());
        assert!(provider.provide("list every order").await.starts_with("Table: orders"));
    }
}

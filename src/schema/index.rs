//! 结构检索索引：每张表一篇文档的向量，持久化为 JSON
//!
//! 启动时若索引文件存在、可读且由同一嵌入模型构建则直接加载，否则重建并写回。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::EmbeddingProvider;
use crate::schema::TableInfo;

/// 一篇已向量化的表文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub table: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaIndex {
    /// 构建索引所用的嵌入模型
    pub model: String,
    /// 构建时间（Unix 秒）
    pub built_at: i64,
    documents: Vec<IndexedDocument>,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl SchemaIndex {
    /// 逐表嵌入文档；任一嵌入失败即返回错误
    pub async fn build(tables: &[TableInfo], embedder: &dyn EmbeddingProvider) -> Result<Self, AgentError> {
        let mut documents = Vec::with_capacity(tables.len());
        for table in tables {
            let text = table.document();
            let embedding = embedder
                .embed(&text)
                .await
                .map_err(|e| AgentError::SchemaIndex(format!("embedding {}: {e}", table.name)))?;
            if embedding.is_empty() {
                return Err(AgentError::SchemaIndex(format!("empty embedding for {}", table.name)));
            }
            documents.push(IndexedDocument {
                table: table.name.clone(),
                text,
                embedding,
            });
        }
        Ok(Self {
            model: embedder.model().to_string(),
            built_at: chrono::Utc::now().timestamp(),
            documents,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::SchemaIndex(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&data).map_err(|e| AgentError::SchemaIndex(format!("parse {}: {e}", path.display())))
    }

    /// 写入 JSON 文件；父目录不存在时自动创建
    pub async fn save(&self, path: &Path) -> Result<(), AgentError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::SchemaIndex(e.to_string()))?;
        }
        let json = serde_json::to_string(self).map_err(|e| AgentError::SchemaIndex(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| AgentError::SchemaIndex(format!("write {}: {e}", path.display())))
    }

    /// 加载可复用的索引，否则重建并持久化（写盘失败仅告警）
    pub async fn load_or_build(
        path: &Path,
        tables: &[TableInfo],
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, AgentError> {
        match Self::load(path).await {
            Ok(index) if index.model == embedder.model() && !index.is_empty() => {
                tracing::info!(path = %path.display(), documents = index.len(), "loaded schema index");
                return Ok(index);
            }
            Ok(index) => {
                tracing::info!(built_with = %index.model, current = %embedder.model(), "rebuilding schema index");
            }
            Err(e) => tracing::info!(error = %e, "no reusable schema index"),
        }
        let index = Self::build(tables, embedder).await?;
        if let Err(e) = index.save(path).await {
            tracing::warn!(error = %e, "could not persist schema index");
        }
        Ok(index)
    }

    /// 余弦相似度最高的 k 篇文档（降序）
    pub fn search(&self, query: &[f32], k: usize) -> Vec<&IndexedDocument> {
        let mut scored: Vec<(f32, &IndexedDocument)> = self
            .documents
            .iter()
            .map(|d| (cosine_similarity(query, &d.embedding), d))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, d)| d).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

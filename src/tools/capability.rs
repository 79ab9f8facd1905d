//! 能力目录：Agent 可请求的三种能力及其调用记录
//!
//! 决策中的调用格式为 `{"tool": "<name>", "args": {...}}`，与 Capability 的 serde 表示一致。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgentError, ExecutionMode};

/// Agent 可请求的能力（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum Capability {
    /// 根据自然语言问题生成一条 SQL
    GenerateSql {
        /// The user's question, restated if needed
        question: String,
    },
    /// 评审一条 SQL 是否正确、是否符合意图
    ReflectOnSql {
        /// The SQL query to review
        sql_query: String,
        /// The user's original question
        original_question: String,
    },
    /// 在服务端数据库执行 SQL 并给出简要分析
    #[serde(rename = "execute_sql_with_analysis")]
    ExecuteSqlWithAnalysis {
        /// The reviewed SQL query to run
        sql_query: String,
    },
}

/// 能力种类（不含参数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    GenerateSql,
    ReflectOnSql,
    ExecuteSqlWithAnalysis,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::GenerateSql,
        CapabilityKind::ReflectOnSql,
        CapabilityKind::ExecuteSqlWithAnalysis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CapabilityKind::GenerateSql => "generate_sql",
            CapabilityKind::ReflectOnSql => "reflect_on_sql",
            CapabilityKind::ExecuteSqlWithAnalysis => "execute_sql_with_analysis",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// 写入 system prompt 的一行说明
    pub fn description(&self) -> &'static str {
        match self {
            CapabilityKind::GenerateSql => {
                "generate_sql(question): generate a SQL query for a natural-language question using the database schema"
            }
            CapabilityKind::ReflectOnSql => {
                "reflect_on_sql(sql_query, original_question): review a SQL query for correctness and intent, returns a JSON verdict with a 1-10 confidence"
            }
            CapabilityKind::ExecuteSqlWithAnalysis => {
                "execute_sql_with_analysis(sql_query): run a reviewed SQL query against the database and return the rows with a short analysis"
            }
        }
    }

    /// 该执行模式下 Agent 可见的能力
    pub fn available_in(mode: ExecutionMode) -> Vec<CapabilityKind> {
        Self::ALL
            .into_iter()
            .filter(|k| mode.allows_execution() || *k != CapabilityKind::ExecuteSqlWithAnalysis)
            .collect()
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::GenerateSql { .. } => CapabilityKind::GenerateSql,
            Capability::ReflectOnSql { .. } => CapabilityKind::ReflectOnSql,
            Capability::ExecuteSqlWithAnalysis { .. } => CapabilityKind::ExecuteSqlWithAnalysis,
        }
    }

    /// 从决策 JSON（`{"tool": .., "args": ..}`）解析；未知能力名为 HallucinatedTool，参数不符为 JsonParseError
    pub fn from_value(value: Value) -> Result<Self, AgentError> {
        let name = value
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::JsonParseError(format!("missing \"tool\" name: {value}")))?;
        if CapabilityKind::from_name(name).is_none() {
            return Err(AgentError::HallucinatedTool(name.to_string()));
        }
        let preview = value.to_string();
        serde_json::from_value(value)
            .map_err(|e| AgentError::JsonParseError(format!("{e}: {preview}")))
    }
}

/// 一次能力调用：本地分配的 id + 能力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    pub capability: Capability,
}

impl CapabilityCall {
    pub fn new(capability: Capability) -> Self {
        Self::with_id(format!("call_{}", uuid::Uuid::new_v4().simple()), capability)
    }

    pub fn with_id(id: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            capability,
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        self.capability.kind()
    }
}

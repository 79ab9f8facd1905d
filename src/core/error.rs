//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt（让 Agent 重新给出决策）或 Abort。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误（模型、决策解析、配置、数据库、索引）；能力超时不在此列，降级为失败结果
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// Agent 决策中的 JSON 无法解析为能力调用
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// Agent 请求了不存在的能力
    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Schema index error: {0}")]
    SchemaIndex(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将纠正提示注入下一轮，让 Agent 重新决策
    RetryWithPrompt(String),
    /// 终止当前请求
    Abort,
}

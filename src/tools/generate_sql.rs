//! SQL 生成：问题 + 结构描述 → 一条 SQL
//!
//! 模型只应输出 SQL 本身；若仍带 ``` 围栏则剥掉。生成失败或输出不像 SQL 时返回失败候选，不会成为最新 SQL。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{json, Value};

use crate::llm::LlmClient;
use crate::memory::Message;

/// 生成失败时 error 字段的前缀
pub const SYNTHESIS_ERROR_PREFIX: &str = "Error generating SQL: ";

/// 一次生成的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCandidate {
    pub question: String,
    pub outcome: Result<String, String>,
}

impl SqlCandidate {
    pub fn generated(question: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            outcome: Ok(sql.into()),
        }
    }

    pub fn failed(question: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            question: question.into(),
            outcome: Err(format!("{SYNTHESIS_ERROR_PREFIX}{reason}")),
        }
    }

    pub fn sql(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    /// 返回给 Agent 的 JSON：`{"success", "question", "sql_query" | "error"}`
    pub fn to_json(&self) -> Value {
        match &self.outcome {
            Ok(sql) => json!({ "success": true, "question": self.question, "sql_query": sql }),
            Err(e) => json!({ "success": false, "question": self.question, "error": e }),
        }
    }
}

static SQL_START_RE: OnceLock<Regex> = OnceLock::new();
static CODE_FENCE_RE: OnceLock<Regex> = OnceLock::new();

/// 文本是否以 SELECT / WITH（可带左括号）开头
pub fn is_sql_shaped(text: &str) -> bool {
    let re = SQL_START_RE.get_or_init(|| Regex::new(r"(?is)^\s*\(?\s*(select|with)\b").unwrap());
    re.is_match(text)
}

/// 剥掉首尾的 ``` / ```sql 围栏
pub fn strip_code_fences(raw: &str) -> String {
    let re = CODE_FENCE_RE.get_or_init(|| Regex::new(r"(?i)^```(?:sql)?\s*|\s*```$").unwrap());
    re.replace_all(raw.trim(), "").trim().to_string()
}

fn synthesis_prompt(question: &str, schema: &str) -> String {
    format!(
        "You are an expert SQL developer. Given the following database schema:\n\
         {schema}\n\n\
         Write a SQL query to answer this question: {question}\n\n\
         Requirements:\n\
         - Use proper JOIN syntax when combining tables\n\
         - Include appropriate WHERE clauses for filtering\n\
         - Use aggregate functions when needed (COUNT, SUM, AVG, etc.)\n\
         - Only use tables and columns that exist in the schema\n\
         - Return a single read-only query\n\n\
         Write ONLY the SQL query, with no explanation or code fences."
    )
}

/// SQL 生成器
pub struct SqlSynthesizer {
    llm: Arc<dyn LlmClient>,
}

impl SqlSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn synthesize(&self, question: &str, schema: &str) -> SqlCandidate {
        let prompt = synthesis_prompt(question, schema);
        match self.llm.complete(&[Message::user(prompt)]).await {
            Ok(raw) => {
                let sql = strip_code_fences(&raw);
                if is_sql_shaped(&sql) {
                    SqlCandidate::generated(question, sql)
                } else {
                    tracing::warn!(output = %raw, "synthesis output is not a SQL query");
                    SqlCandidate::failed(question, "model output is not a SQL query")
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SQL synthesis failed");
                SqlCandidate::failed(question, e)
            }
        }
    }
}

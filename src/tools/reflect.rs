//! SQL 反思：以资深审阅者身份评审一条 SQL
//!
//! 模型按 Schema 输出 JSON 结论；无法解析、置信度越界或调用失败时返回固定的兜底结论，从不报错。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::schema::{extract_json_block, verdict_format_instructions};

/// 结论中按类别列出的问题
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PotentialIssues {
    /// Issues with table names, joins or missing tables
    #[serde(default)]
    pub table_issues: Vec<String>,
    /// Issues with column names, types or schema mismatches
    #[serde(default)]
    pub schema_issues: Vec<String>,
}

/// 评审结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReflectionVerdict {
    /// Whether the SQL query is syntactically and semantically valid
    pub is_valid: bool,
    /// Whether the SQL query answers the user's question
    pub matches_intent: bool,
    /// Problems found, grouped by category
    pub potential_issues: PotentialIssues,
    /// Concrete suggestions to improve the query
    pub suggestions: Vec<String>,
    /// Confidence in the assessment, from 1 (low) to 10 (high)
    #[schemars(range(min = 1, max = 10))]
    pub confidence: u8,
    /// Short explanation of the assessment
    pub explanation: String,
}

impl ReflectionVerdict {
    /// 兜底结论：无效、不符合意图、置信度 1
    pub fn fallback(reason: impl std::fmt::Display) -> Self {
        Self {
            is_valid: false,
            matches_intent: false,
            potential_issues: PotentialIssues {
                table_issues: vec!["Reflection step failed; see explanation".to_string()],
                schema_issues: Vec::new(),
            },
            suggestions: vec![
                "Ensure the reflection prompt variables are supplied correctly.".to_string(),
                "Check SQL query for basic syntax and table/column names.".to_string(),
            ],
            confidence: 1,
            explanation: format!("Reflection failed: {reason}"),
        }
    }

    /// 有效、符合意图且置信度达到阈值
    pub fn passes(&self, threshold: u8) -> bool {
        self.is_valid && self.matches_intent && self.confidence >= threshold
    }

    /// 从模型输出解析结论；置信度须在 1..=10
    pub fn parse(raw: &str) -> Result<Self, String> {
        let json = extract_json_block(raw).ok_or_else(|| "no JSON object in reflection output".to_string())?;
        let verdict: ReflectionVerdict =
            serde_json::from_str(json).map_err(|e| format!("invalid verdict JSON: {e}"))?;
        if !(1..=10).contains(&verdict.confidence) {
            return Err(format!("confidence {} outside 1..=10", verdict.confidence));
        }
        Ok(verdict)
    }
}

fn reflection_prompt(sql: &str, question: &str, schema: &str) -> String {
    format!(
        "You are a Senior SQL Developer reviewing a query written by a colleague.\n\n\
         Database schema:\n{schema}\n\n\
         Original question: {question}\n\n\
         SQL query:\n{sql}\n\n\
         Check the query for:\n\
         1. Syntax errors\n\
         2. Tables and columns that do not exist in the schema\n\
         3. Incorrect joins or filters\n\
         4. Whether the result actually answers the question\n\n\
         Respond strictly in the following JSON format:\n{}",
        verdict_format_instructions()
    )
}

/// 反思评审器
pub struct ReflectionCritic {
    llm: Arc<dyn LlmClient>,
}

impl ReflectionCritic {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn critique(&self, sql: &str, question: &str, schema: &str) -> ReflectionVerdict {
        let prompt = reflection_prompt(sql, question, schema);
        let raw = match self.llm.complete(&[Message::user(prompt)]).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "reflection call failed");
                return ReflectionVerdict::fallback(e);
            }
        };
        match ReflectionVerdict::parse(&raw) {
            Ok(verdict) => {
                tracing::info!(
                    confidence = verdict.confidence,
                    is_valid = verdict.is_valid,
                    matches_intent = verdict.matches_intent,
                    "reflection verdict"
                );
                verdict
            }
            Err(reason) => {
                tracing::warn!(%reason, "reflection output rejected");
                ReflectionVerdict::fallback(reason)
            }
        }
    }
}

//! Planner：Agent 决策与能力调用解析
//!
//! 调用 LLM 得到纯文本回答或 JSON 能力调用；parse_decision 从文本中提取 JSON，
//! 支持单个 `{"tool", "args"}`、批量 `{"tool_calls": [...]}` 以及二者的数组形式。

use std::sync::Arc;

use serde_json::Value;

use crate::core::{AgentError, ExecutionMode};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::prompts::system_prompt;
use crate::tools::{extract_json_block, Capability, CapabilityCall};

/// Agent 的一次决策
#[derive(Debug, Clone, PartialEq)]
pub enum AgentDecision {
    /// 最终回答
    Final(String),
    /// 需要按序执行的能力调用（text 为模型原始输出）
    Calls {
        text: String,
        calls: Vec<CapabilityCall>,
    },
}

fn mentions_tool(json: &str) -> bool {
    json.contains("\"tool\"") || json.contains("\"tool_calls\"")
}

/// 解析模型输出：无工具 JSON 时为最终回答；工具 JSON 残缺为 JsonParseError；未知能力为 HallucinatedTool
pub fn parse_decision(output: &str) -> Result<AgentDecision, AgentError> {
    let trimmed = output.trim();
    let final_answer = || Ok(AgentDecision::Final(trimmed.to_string()));

    let json_str = match extract_json_block(trimmed) {
        Some(s) => s,
        None if trimmed.starts_with('[') => trimmed,
        None => return final_answer(),
    };

    let value: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) if mentions_tool(json_str) => {
            return Err(AgentError::JsonParseError(format!("{}: {}", e, json_str)));
        }
        Err(_) => return final_answer(),
    };

    let entries: Vec<Value> = match value {
        Value::Object(mut map) if map.contains_key("tool_calls") => match map.remove("tool_calls") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AgentError::JsonParseError(
                    "\"tool_calls\" must be an array of {\"tool\", \"args\"} objects".to_string(),
                ))
            }
        },
        Value::Object(map) if map.contains_key("tool") => vec![Value::Object(map)],
        Value::Array(items) if !items.is_empty() && items.iter().all(|i| i.get("tool").is_some()) => items,
        _ => return final_answer(),
    };
    if entries.is_empty() {
        return final_answer();
    }

    let calls = entries
        .into_iter()
        .map(|e| Capability::from_value(e).map(CapabilityCall::new))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AgentDecision::Calls {
        text: trimmed.to_string(),
        calls,
    })
}

/// Planner：持有 LLM 与 system prompt；system prompt 只在调用时拼接，不写入消息日志
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// 按部署模式生成 system prompt
    pub fn for_mode(llm: Arc<dyn LlmClient>, mode: ExecutionMode, confidence_threshold: u8) -> Self {
        Self::new(llm, system_prompt(mode, confidence_threshold))
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn decide(&self, history: &[Message]) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(history.len() + 1);
        full_messages.push(Message::system(self.system_prompt.clone()));
        full_messages.extend_from_slice(history);
        self.llm.complete(&full_messages).await.map_err(AgentError::LlmError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Role;
    use crate::tools::CapabilityKind;

    #[test]
    fn test_plain_text_is_final() {
        let d = parse_decision("There are 42 customers.").unwrap();
        assert_eq!(d, AgentDecision::Final("There are 42 customers.".into()));
    }

    #[test]
    fn test_json_without_tool_is_final() {
        let d = parse_decision("Result: {\"total\": 5}").unwrap();
        assert!(matches!(d, AgentDecision::Final(_)));
    }

    #[test]
    fn test_single_fenced_call() {
        let out = "I'll generate the query.\n```json\n{\"tool\": \"generate_sql\", \"args\": {\"question\": \"How many customers?\"}}\n```";
        match parse_decision(out).unwrap() {
            AgentDecision::Calls { calls, .. } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].kind(), CapabilityKind::GenerateSql);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_batch_calls_keep_order() {
        let out = r#"{"tool_calls": [
            {"tool": "reflect_on_sql", "args": {"sql_query": "SELECT 1", "original_question": "q"}},
            {"tool": "execute_sql_with_analysis", "args": {"sql_query": "SELECT 1"}}
        ]}"#;
        match parse_decision(out).unwrap() {
            AgentDecision::Calls { calls, .. } => {
                let kinds: Vec<_> = calls.iter().map(|c| c.kind()).collect();
                assert_eq!(kinds, vec![CapabilityKind::ReflectOnSql, CapabilityKind::ExecuteSqlWithAnalysis]);
                assert_ne!(calls[0].id, calls[1].id);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bare_array_of_calls() {
        let out = r#"[{"tool": "generate_sql", "args": {"question": "a"}}, {"tool": "generate_sql", "args": {"question": "b"}}]"#;
        assert!(matches!(parse_decision(out).unwrap(), AgentDecision::Calls { calls, .. } if calls.len() == 2));
    }

    #[test]
    fn test_malformed_tool_json_is_parse_error() {
        let err = parse_decision("{\"tool\": \"generate_sql\", \"args\": {").unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }

    #[test]
    fn test_unknown_tool_is_hallucinated() {
        let err = parse_decision("{\"tool\": \"delete_everything\", \"args\": {}}").unwrap_err();
        assert!(matches!(err, AgentError::HallucinatedTool(_)));
    }

    #[tokio::test]
    async fn test_decide_prepends_system_prompt() {
        let llm = Arc::new(ScriptedLlmClient::with_replies(["done"]));
        let planner = Planner::new(llm.clone(), "SYSTEM");
        let out = planner.decide(&[Message::user("hi")]).await.unwrap();
        assert_eq!(out, "done");
        let sent = &llm.calls()[0];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[0].content, "SYSTEM");
    }
}

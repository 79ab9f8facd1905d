//! 请求/响应模型与响应组装
//!
//! 响应从线程的完整消息日志中提取：用过的能力（去重、保持首次出现顺序）、
//! 最近一次反思结论、最近一次执行结果；客户端模式下从最终回答中抽取 SQL。

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ExecutionMode, LoopOutcome};
use crate::memory::{Message, Role};
use crate::tools::{CapabilityKind, ReflectionVerdict, SqlRow};

fn default_thread_id() -> String {
    "default".to_string()
}

/// 对话请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_thread_id")]
    pub thread_id: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// 仅服务端模式返回的字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerExecutionOutput {
    pub agent_response: String,
    pub sql_results: Option<Vec<SqlRow>>,
}

/// 对话响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub user_message: String,
    #[serde(flatten)]
    pub execution: Option<ServerExecutionOutput>,
    pub tools_used: Vec<String>,
    pub sql_query: Option<String>,
    pub reflection_applied: bool,
    pub reflection_results: Option<ReflectionVerdict>,
    pub thread_id: String,
    pub success: bool,
}

/// 服务状态
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub mode: ExecutionMode,
    pub ai_working: bool,
    /// 客户端模式下无数据库，为 None
    pub database_working: Option<bool>,
    pub schema_provider: &'static str,
    pub active_threads: usize,
}

/// 合并连续空白
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

static FENCED_SQL_RE: OnceLock<Regex> = OnceLock::new();
static BARE_SQL_RE: OnceLock<Regex> = OnceLock::new();

/// 从最终回答中抽取 SQL：优先 ```sql 围栏，其次第一个以 SELECT/WITH 开头、以分号结束的片段
pub fn extract_sql_from_answer(answer: &str) -> Option<String> {
    let fenced = FENCED_SQL_RE.get_or_init(|| Regex::new(r"(?i)```sql\s*([\s\S]+?)\s*```").unwrap());
    if let Some(sql) = fenced.captures(answer).and_then(|c| c.get(1)) {
        return Some(normalize_whitespace(sql.as_str()));
    }
    let bare = BARE_SQL_RE.get_or_init(|| Regex::new(r"(?i)\b(?:SELECT|WITH)\b[\s\S]+?;").unwrap());
    bare.find(answer).map(|m| normalize_whitespace(m.as_str()))
}

/// 从消息日志组装响应
pub fn assemble_response(
    request: &ChatRequest,
    messages: &[Message],
    final_answer: &str,
    outcome: LoopOutcome,
    mode: ExecutionMode,
) -> ChatResponse {
    let mut call_kinds: HashMap<&str, CapabilityKind> = HashMap::new();
    let mut tools_used: Vec<String> = Vec::new();
    let mut reflection: Option<ReflectionVerdict> = None;
    let mut sql_query: Option<String> = None;
    let mut sql_results: Option<Vec<SqlRow>> = None;

    for m in messages {
        match m.role {
            Role::Assistant => {
                for call in &m.tool_calls {
                    let kind = call.kind();
                    call_kinds.insert(call.id.as_str(), kind);
                    if !tools_used.iter().any(|t| t == kind.name()) {
                        tools_used.push(kind.name().to_string());
                    }
                }
            }
            Role::Tool => {
                let Some(kind) = m.tool_call_id.as_deref().and_then(|id| call_kinds.get(id)) else {
                    continue;
                };
                let Ok(value) = serde_json::from_str::<Value>(&m.content) else {
                    continue;
                };
                match kind {
                    CapabilityKind::ReflectOnSql => {
                        if let Ok(v) = serde_json::from_value::<ReflectionVerdict>(value) {
                            reflection = Some(v);
                        }
                    }
                    CapabilityKind::ExecuteSqlWithAnalysis => {
                        sql_query = value.get("sql_query").and_then(Value::as_str).map(String::from);
                        sql_results = value
                            .get("results")
                            .cloned()
                            .and_then(|r| serde_json::from_value(r).ok());
                    }
                    CapabilityKind::GenerateSql => {}
                }
            }
            _ => {}
        }
    }

    if !mode.allows_execution() && sql_query.is_none() {
        sql_query = extract_sql_from_answer(final_answer);
    }

    let execution = mode.allows_execution().then(|| ServerExecutionOutput {
        agent_response: final_answer.to_string(),
        sql_results,
    });

    ChatResponse {
        user_message: request.message.clone(),
        execution,
        tools_used,
        sql_query,
        reflection_applied: reflection.is_some(),
        reflection_results: reflection,
        thread_id: request.thread_id.clone(),
        success: outcome.is_success(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Capability, CapabilityCall, QueryResult};

    fn verdict_json(confidence: u8) -> String {
        serde_json::json!({
            "is_valid": true, "matches_intent": true,
            "potential_issues": {"table_issues": [], "schema_issues": []},
            "suggestions": [], "confidence": confidence, "explanation": "ok"
        })
        .to_string()
    }

    fn log_with_two_reflections() -> Vec<Message> {
        let gen = CapabilityCall::with_id("call_1", Capability::GenerateSql { question: "q".into() });
        let r1 = CapabilityCall::with_id(
            "call_2",
            Capability::ReflectOnSql { sql_query: "SELECT 1".into(), original_question: "q".into() },
        );
        let r2 = CapabilityCall::with_id(
            "call_3",
            Capability::ReflectOnSql { sql_query: "SELECT 2".into(), original_question: "q".into() },
        );
        let exec = CapabilityCall::with_id(
            "call_4",
            Capability::ExecuteSqlWithAnalysis { sql_query: "SELECT 2".into() },
        );
        let mut row = SqlRow::new();
        row.insert("value".into(), Value::from(2));
        let result = QueryResult::from_rows("SELECT 2", vec![row], 0.01);
        vec![
            Message::user("q"),
            Message::assistant_with_calls("", vec![gen.clone(), r1]),
            Message::tool_result("call_1", r#"{"success":true,"question":"q","sql_query":"SELECT 1"}"#),
            Message::tool_result("call_2", verdict_json(5)),
            Message::assistant_with_calls("", vec![gen, r2]),
            Message::tool_result("call_3", verdict_json(9)),
            Message::assistant_with_calls("", vec![exec]),
            Message::tool_result("call_4", serde_json::to_string(&result).unwrap()),
            Message::assistant("Two."),
        ]
    }

    #[test]
    fn test_extract_sql_fenced() {
        assert_eq!(
            extract_sql_from_answer("Here:\n```sql SELECT * FROM customers; ```").as_deref(),
            Some("SELECT * FROM customers;")
        );
        assert_eq!(
            extract_sql_from_answer("```SQL\nSELECT a,\n   b\nFROM t\n```").as_deref(),
            Some("SELECT a, b FROM t")
        );
    }

    #[test]
    fn test_extract_sql_bare_statement() {
        let answer = "The query is SELECT name\n  FROM customers WHERE city = 'Paris'; run it yourself.";
        assert_eq!(
            extract_sql_from_answer(answer).as_deref(),
            Some("SELECT name FROM customers WHERE city = 'Paris';")
        );
        assert_eq!(extract_sql_from_answer("No query needed."), None);
    }

    #[test]
    fn test_assemble_server_side_uses_latest_results() {
        let req = ChatRequest::new("q", "t1");
        let resp = assemble_response(&req, &log_with_two_reflections(), "Two.", LoopOutcome::Answered, ExecutionMode::ServerSide);
        assert_eq!(resp.tools_used, vec!["generate_sql", "reflect_on_sql", "execute_sql_with_analysis"]);
        assert_eq!(resp.reflection_results.as_ref().map(|v| v.confidence), Some(9));
        assert!(resp.reflection_applied);
        assert_eq!(resp.sql_query.as_deref(), Some("SELECT 2"));
        let exec = resp.execution.as_ref().unwrap();
        assert_eq!(exec.agent_response, "Two.");
        assert_eq!(exec.sql_results.as_ref().unwrap()[0]["value"], 2);
        assert!(resp.success);
    }

    #[test]
    fn test_client_side_omits_execution_fields() {
        let req = ChatRequest::new("q", "t1");
        let messages = vec![Message::user("q"), Message::assistant("```sql\nSELECT 1;\n```")];
        let resp = assemble_response(&req, &messages, "```sql\nSELECT 1;\n```", LoopOutcome::Answered, ExecutionMode::ClientSide);
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("agent_response").is_none());
        assert!(v.get("sql_results").is_none());
        assert_eq!(v["sql_query"], "SELECT 1;");
        assert_eq!(v["reflection_applied"], false);
        assert!(v["reflection_results"].is_null());
    }

    #[test]
    fn test_exhausted_outcome_is_not_success() {
        let req = ChatRequest::new("q", "t1");
        let resp = assemble_response(&req, &[], "gave up", LoopOutcome::AttemptsExhausted, ExecutionMode::ServerSide);
        assert!(!resp.success);
        assert!(resp.tools_used.is_empty());
    }

    #[test]
    fn test_request_thread_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(req.thread_id, "default");
    }
}

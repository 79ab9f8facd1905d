//! JSON Schema 生成与 JSON 片段提取
//!
//! 能力调用与评审结论的 Schema 由 schemars 生成后拼入 prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};

use crate::tools::{Capability, ReflectionVerdict};

/// 一次请求多个能力时的外层格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatch {
    /// Capability calls to run in order
    tool_calls: Vec<Capability>,
}

fn pretty<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 单个能力调用的 JSON Schema，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    pretty::<Capability>()
}

/// 批量能力调用（`{"tool_calls": [...]}`）的 JSON Schema
pub fn tool_batch_schema_json() -> String {
    pretty::<ToolCallBatch>()
}

/// 评审结论的格式说明，嵌入反思 prompt
pub fn verdict_format_instructions() -> String {
    format!(
        "The output should be a JSON object that conforms to the JSON schema below.\n{}",
        pretty::<ReflectionVerdict>()
    )
}

/// 从模型输出中提取 JSON 片段：优先 ```json 围栏，其次首个 `{` 到最后一个 `}`
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_capabilities() {
        let schema = tool_call_schema_json();
        assert!(schema.contains("generate_sql"));
        assert!(schema.contains("execute_sql_with_analysis"));
        assert!(tool_batch_schema_json().contains("tool_calls"));
    }

    #[test]
    fn test_verdict_instructions_list_fields() {
        let text = verdict_format_instructions();
        for field in ["is_valid", "matches_intent", "potential_issues", "suggestions", "confidence"] {
            assert!(text.contains(field), "missing {field}");
        }
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Sure.\n```json\n{\"tool\": \"generate_sql\"}\n```\nthanks";
        assert_eq!(extract_json_block(text), Some("{\"tool\": \"generate_sql\"}"));
    }

    #[test]
    fn test_extract_bare_braces() {
        assert_eq!(extract_json_block("x {\"a\": {\"b\": 1}} y"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_block("no json here"), None);
        assert_eq!(extract_json_block("} backwards {"), None);
    }
}

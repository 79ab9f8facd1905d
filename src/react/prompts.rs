//! Agent 的 system prompt：按部署模式给出工作流程、可用能力与调用协议

use crate::core::ExecutionMode;
use crate::tools::{tool_batch_schema_json, tool_call_schema_json, CapabilityKind};

fn workflow(mode: ExecutionMode, threshold: u8) -> String {
    let mut steps = vec![
        "For business questions, use generate_sql to create a SQL query".to_string(),
        "ALWAYS use reflect_on_sql to validate the query".to_string(),
    ];
    match mode {
        ExecutionMode::ServerSide => {
            steps.push(format!(
                "Only execute queries that pass reflection (valid, matching intent, confidence >= {threshold}/10)"
            ));
            steps.push("If reflection suggests improvements, generate a new query".to_string());
            steps.push("Use execute_sql_with_analysis to get the results".to_string());
            steps.push("Provide business insights based on the data".to_string());
        }
        ExecutionMode::ClientSide => {
            steps.push(format!(
                "Only return queries that pass reflection (valid, matching intent, confidence >= {threshold}/10)"
            ));
            steps.push("If reflection suggests improvements, generate a new query".to_string());
            steps.push(
                "Finish with the final query inside a ```sql fenced block; it will be run by the caller"
                    .to_string(),
            );
        }
    }
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 构建完整 system prompt
pub fn system_prompt(mode: ExecutionMode, confidence_threshold: u8) -> String {
    let tools = CapabilityKind::available_in(mode)
        .iter()
        .map(|k| format!("- {}", k.description()))
        .collect::<Vec<_>>()
        .join("\n");
    let closing = match mode {
        ExecutionMode::ServerSide => "Always explain your reasoning and what the reflection process revealed.",
        ExecutionMode::ClientSide => {
            "Server-side execution is disabled: never request execute_sql_with_analysis. Explain what the reflection process revealed."
        }
    };
    format!(
        "You are a Senior Business Intelligence Analyst with a quality-first approach.\n\n\
         Your workflow:\n{workflow}\n\n\
         Tools available:\n{tools}\n\n\
         {closing}\n\n\
         ## Calling tools\n\
         To call a tool, reply with ONLY a JSON object of the form {{\"tool\": \"<name>\", \"args\": {{...}}}} \
         matching this schema:\n{single}\n\
         To call several tools in order, reply with {{\"tool_calls\": [...]}} matching:\n{batch}\n\
         Each result comes back as an observation tagged with its call id. \
         When you are done, reply in plain text without any tool JSON; that reply is the final answer.",
        workflow = workflow(mode, confidence_threshold),
        single = tool_call_schema_json(),
        batch = tool_batch_schema_json(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_side_prompt_offers_execution() {
        let p = system_prompt(ExecutionMode::ServerSide, 7);
        assert!(p.contains("- execute_sql_with_analysis("));
        assert!(p.contains("confidence >= 7/10"));
        assert!(p.contains("Provide business insights"));
    }

    #[test]
    fn test_client_side_prompt_hides_execution() {
        let p = system_prompt(ExecutionMode::ClientSide, 8);
        assert!(!p.contains("- execute_sql_with_analysis("));
        assert!(p.contains("confidence >= 8/10"));
        assert!(p.contains("```sql"));
    }
}

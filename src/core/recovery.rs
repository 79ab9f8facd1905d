//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供编排循环决定是重新提示 Agent 还是终止请求。

use crate::core::{AgentError, RecoveryAction};
use crate::tools::CapabilityKind;

/// 语义化错误恢复：决策格式错误 / 幻觉能力 → 重新提示；其余 → 终止
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply contained malformed capability JSON: {raw}. \
                 To call a capability reply with exactly one JSON object of the form \
                 {{\"tool\": \"<name>\", \"args\": {{...}}}} and nothing else, \
                 or answer in plain text when you are done."
            )),
            AgentError::HallucinatedTool(name) => {
                let available: Vec<&str> = CapabilityKind::ALL.iter().map(|k| k.name()).collect();
                RecoveryAction::RetryWithPrompt(format!(
                    "There is no capability named '{name}'. Available capabilities: {}.",
                    available.join(", ")
                ))
            }
            _ => RecoveryAction::Abort,
        }
    }
}

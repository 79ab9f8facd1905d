//! 短期记忆：单个线程的有序消息日志
//!
//! 消息类型：system 指令、用户问题、Agent 决策（可携带能力调用）、能力调用结果（以调用 id 关联）。
//! 超出上限时仅在新一轮开始时剪枝，保证历史总以用户消息开头。

use serde::{Deserialize, Serialize};

use crate::tools::CapabilityCall;

/// 消息角色
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    /// 能力调用结果
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Agent 决策中请求的能力调用（仅 Assistant）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<CapabilityCall>,
    /// 对应的能力调用 id（仅 Tool）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    /// 携带能力调用请求的 Agent 决策
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<CapabilityCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content.into())
        }
    }

    /// 能力调用结果，以调用 id 标记
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content.into())
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 发送给模型的文本
    pub fn model_text(&self) -> String {
        match self.role {
            Role::Tool => format!(
                "Observation for {}:\n{}",
                self.tool_call_id.as_deref().unwrap_or("unknown call"),
                self.content
            ),
            Role::Assistant if self.content.trim().is_empty() && self.has_tool_calls() => {
                serde_json::json!({ "tool_calls": self.tool_calls }).to_string()
            }
            _ => self.content.clone(),
        }
    }
}

/// 短期记忆：保留最近 max_messages 条消息
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// 开启新一轮：写入用户问题并剪枝
    pub fn begin_turn(&mut self, question: Message) {
        self.messages.push(question);
        self.prune();
    }

    /// 轮次内追加（不剪枝）
    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出上限时丢弃最旧的消息，并继续丢弃直到遇到用户消息，避免孤立的决策或结果
    fn prune(&mut self) {
        if self.messages.len() <= self.max_messages {
            return;
        }
        let excess = self.messages.len() - self.max_messages;
        let cut = self.messages[excess..]
            .iter()
            .position(|m| m.role == Role::User)
            .map(|p| p + excess)
            .unwrap_or(self.messages.len() - 1);
        self.messages.drain(..cut);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Capability, CapabilityCall};

    fn turn(memory: &mut ConversationMemory, question: &str) {
        memory.begin_turn(Message::user(question));
        let call = CapabilityCall::new(Capability::GenerateSql {
            question: question.to_string(),
        });
        let id = call.id.clone();
        memory.push(Message::assistant_with_calls("", vec![call]));
        memory.push(Message::tool_result(id, "{}"));
        memory.push(Message::assistant("done"));
    }

    #[test]
    fn test_prune_keeps_history_starting_at_user() {
        let mut memory = ConversationMemory::new(6);
        turn(&mut memory, "q1");
        turn(&mut memory, "q2");
        memory.begin_turn(Message::user("q3"));

        assert!(memory.len() <= 6);
        assert_eq!(memory.messages()[0].role, Role::User);
        assert_eq!(memory.messages()[0].content, "q2");
        assert_eq!(memory.messages().last().unwrap().content, "q3");
    }

    #[test]
    fn test_no_prune_mid_turn() {
        let mut memory = ConversationMemory::new(2);
        memory.begin_turn(Message::user("q1"));
        for _ in 0..5 {
            memory.push(Message::assistant("thinking"));
        }
        memory.push(Message::user("corrective prompt"));
        assert_eq!(memory.len(), 7);
        memory.begin_turn(Message::user("q2"));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.messages()[0].content, "q2");
    }

    #[test]
    fn test_tool_message_model_text_carries_call_id() {
        let msg = Message::tool_result("call_42", "{\"ok\":true}");
        let text = msg.model_text();
        assert!(text.contains("call_42"));
        assert!(text.contains("{\"ok\":true}"));
    }

    #[test]
    fn test_assistant_with_calls_serializes_calls_when_empty_content() {
        let call = CapabilityCall::with_id(
            "call_1",
            Capability::ExecuteSqlWithAnalysis {
                sql_query: "SELECT 1".to_string(),
            },
        );
        let msg = Message::assistant_with_calls("", vec![call]);
        let text = msg.model_text();
        assert!(text.contains("execute_sql_with_analysis"));
        assert!(text.contains("SELECT 1"));
    }
}

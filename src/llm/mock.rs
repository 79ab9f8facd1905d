//! Scripted LLM 客户端（用于测试，无需 API）
//!
//! 按入队顺序依次返回预设回复，并记录每次收到的完整消息列表，便于断言提示词内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 脚本客户端：队列耗尽后返回 ApiError
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组成功回复初始化
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for r in replies {
            client.push_ok(r);
        }
        client
    }

    pub fn push_ok(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    pub fn push_err(&self, err: LlmError) {
        self.lock_replies().push_back(Err(err));
    }

    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    /// 每次调用收到的消息列表（按调用顺序）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.lock_calls().clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.replies.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<Vec<Message>>> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.lock_calls().push(messages.to_vec());
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::ApiError("scripted replies exhausted".to_string())))
    }
}

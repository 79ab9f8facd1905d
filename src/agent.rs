//! SQL Agent 运行时
//!
//! 供命令行与 HTTP 前端调用：chat 对单条问题在对应线程上跑 ReAct 循环并组装响应，
//! status 检查模型与数据库是否可用。同一线程的请求串行，不同线程并发。

use crate::config::AppConfig;
use crate::core::{build_components, AgentComponents, AgentError, ExecutionMode};
use crate::memory::{Message, RetentionPolicy, ThreadStore};
use crate::react::{react_loop, ReactSession};
use crate::response::{assemble_response, ChatRequest, ChatResponse, StatusReport};

pub struct SqlAgent {
    components: AgentComponents,
    threads: ThreadStore,
}

impl SqlAgent {
    pub fn new(components: AgentComponents, retention: RetentionPolicy) -> Self {
        Self {
            components,
            threads: ThreadStore::new(retention),
        }
    }

    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let components = build_components(cfg).await?;
        let retention = RetentionPolicy {
            max_messages: cfg.memory.max_messages,
            idle_ttl_secs: cfg.memory.thread_ttl_secs,
        };
        Ok(Self::new(components, retention))
    }

    pub fn mode(&self) -> ExecutionMode {
        self.components.mode()
    }

    pub fn components(&self) -> &AgentComponents {
        &self.components
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    /// 处理一条问题；模型或配置类错误返回 Err，能力失败在响应内体现
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        tracing::info!(thread_id = %request.thread_id, message = %request.message, "chat request");
        let mut log = self.threads.checkout(&request.thread_id).await;

        let c = &self.components;
        let session = ReactSession::new(&c.planner, &c.executor, &c.recovery)
            .with_limits(c.limits)
            .with_gate(c.gate);
        let result = react_loop(&session, &mut log.memory, &request.message).await;
        log.touch();
        let result = result?;

        let response = assemble_response(
            request,
            log.memory.messages(),
            &result.response,
            result.outcome,
            self.mode(),
        );
        tracing::info!(
            thread_id = %request.thread_id,
            steps = result.steps,
            tools = ?response.tools_used,
            success = response.success,
            "chat finished"
        );
        Ok(response)
    }

    /// 检查模型与数据库是否可用
    pub async fn status(&self) -> StatusReport {
        let ai_working = match self.components.llm.complete(&[Message::user("Reply with OK.")]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "LLM health check failed");
                false
            }
        };
        StatusReport {
            status: "running",
            mode: self.mode(),
            ai_working,
            database_working: self.components.executor.sql().ping().await,
            schema_provider: self.components.executor.schema().variant_name(),
            active_threads: self.threads.thread_count().await,
        }
    }
}

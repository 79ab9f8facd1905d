//! 组件装配：按配置创建 LLM、结构提供者、能力执行器与 Planner
//!
//! 部署模式由 SqlExecutor 决定，Planner 的 system prompt 与之保持一致。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{AgentError, ExecutionMode, RecoveryEngine};
use crate::llm::{
    create_embedder_from_config, LlmClient, OpenAiClient, RetryConfig, RetryingLlmClient,
};
use crate::react::{ConfidenceGate, LoopLimits, Planner};
use crate::schema::SchemaProvider;
use crate::tools::{
    CapabilityExecutor, DatabaseExecutor, ReflectionCritic, SqlExecutor, SqlSynthesizer,
};

const DEFAULT_CAPABILITY_TIMEOUT_SECS: u64 = 90;

/// 一次请求所需的全部组件（进程内共享）
pub struct AgentComponents {
    /// Planner 使用的模型（状态检查也用它）
    pub llm: Arc<dyn LlmClient>,
    pub planner: Planner,
    pub executor: CapabilityExecutor,
    pub recovery: RecoveryEngine,
    pub limits: LoopLimits,
    pub gate: ConfidenceGate,
}

impl AgentComponents {
    /// 决策、生成、反思共用一个模型
    pub fn new(llm: Arc<dyn LlmClient>, schema: SchemaProvider, sql: SqlExecutor) -> Self {
        Self::with_role_llms(llm.clone(), llm.clone(), llm, schema, sql)
    }

    /// 决策、生成、反思分别使用不同模型
    pub fn with_role_llms(
        planner_llm: Arc<dyn LlmClient>,
        synthesizer_llm: Arc<dyn LlmClient>,
        critic_llm: Arc<dyn LlmClient>,
        schema: SchemaProvider,
        sql: SqlExecutor,
    ) -> Self {
        let gate = ConfidenceGate::default();
        let mode = sql.mode();
        Self {
            planner: Planner::for_mode(planner_llm.clone(), mode, gate.threshold),
            llm: planner_llm,
            executor: CapabilityExecutor::new(
                schema,
                SqlSynthesizer::new(synthesizer_llm),
                ReflectionCritic::new(critic_llm),
                sql,
                DEFAULT_CAPABILITY_TIMEOUT_SECS,
            ),
            recovery: RecoveryEngine::new(),
            limits: LoopLimits::default(),
            gate,
        }
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 替换门槛，同时按新阈值重建 system prompt
    pub fn with_gate(mut self, gate: ConfidenceGate) -> Self {
        self.planner = Planner::for_mode(self.llm.clone(), self.mode(), gate.threshold);
        self.gate = gate;
        self
    }

    pub fn with_capability_timeout(mut self, timeout_secs: u64) -> Self {
        self.executor = self.executor.with_timeout(timeout_secs);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.executor.mode()
    }
}

/// 创建带超时与重试的 OpenAI 兼容客户端；缺少 API Key 时为配置错误
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let api_key = cfg
        .llm
        .resolve_api_key()
        .ok_or_else(|| AgentError::ConfigError("OPENAI_API_KEY is not set".to_string()))?;
    tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
    let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&api_key))
        .with_temperature(cfg.llm.temperature);
    let retry = RetryConfig {
        max_retries: cfg.llm.retry.max_retries,
        base_delay_ms: cfg.llm.retry.base_delay_ms,
        request_timeout: Duration::from_secs(cfg.llm.timeouts.request),
    };
    Ok(Arc::new(RetryingLlmClient::new(Arc::new(client), retry)))
}

/// 按配置装配组件：服务端模式自省数据库并构建结构索引，客户端模式使用静态结构
pub async fn build_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(cfg)?;
    let mode = cfg.execution_mode();
    tracing::info!(mode = ?mode, "building agent components");

    let sql = match mode {
        ExecutionMode::ServerSide => {
            if !cfg.database.path.exists() {
                tracing::warn!(db = %cfg.database.path.display(), "database file not found; queries will fail");
            }
            SqlExecutor::ServerSide(DatabaseExecutor::new(
                cfg.database.path.clone(),
                Duration::from_secs(cfg.database.query_timeout_secs),
            ))
        }
        ExecutionMode::ClientSide => SqlExecutor::ClientSide,
    };

    let embedder = if mode.allows_execution() {
        create_embedder_from_config(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.embedding_model,
            cfg.llm.resolve_api_key().as_deref(),
        )
    } else {
        None
    };
    let schema = SchemaProvider::for_mode(mode, &cfg.database.path, &cfg.schema, embedder).await?;
    tracing::info!(schema = schema.variant_name(), "schema provider ready");

    Ok(AgentComponents::new(llm, schema, sql)
        .with_limits(LoopLimits {
            max_steps: cfg.agent.max_steps,
            max_sql_attempts: cfg.agent.max_sql_attempts,
        })
        .with_gate(ConfidenceGate {
            threshold: cfg.agent.confidence_threshold,
            enforced: cfg.agent.enforce_confidence_gate,
        })
        .with_capability_timeout(cfg.agent.capability_timeout_secs))
}

//! 能力执行器
//!
//! 持有结构提供者、生成器、评审器与 SQL 执行器，按 Capability 分派并施加统一超时；
//! 结果一律为 JSON 字符串写回消息日志，每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::ExecutionMode;
use crate::schema::SchemaProvider;
use crate::tools::{
    Capability, CapabilityCall, QueryResult, ReflectionCritic, ReflectionVerdict, SqlCandidate,
    SqlExecutor, SqlSynthesizer,
};

/// 单次能力调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityOutput {
    Synthesis(SqlCandidate),
    Reflection(ReflectionVerdict),
    Execution(QueryResult),
}

impl CapabilityOutput {
    pub fn to_value(&self) -> Value {
        match self {
            CapabilityOutput::Synthesis(c) => c.to_json(),
            CapabilityOutput::Reflection(v) => serde_json::to_value(v).unwrap_or(Value::Null),
            CapabilityOutput::Execution(r) => serde_json::to_value(r).unwrap_or(Value::Null),
        }
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// 审计日志中的 ok 标记
    pub fn succeeded(&self) -> bool {
        match self {
            CapabilityOutput::Synthesis(c) => c.sql().is_some(),
            CapabilityOutput::Reflection(v) => v.is_valid,
            CapabilityOutput::Execution(r) => r.success,
        }
    }
}

/// 能力执行器
pub struct CapabilityExecutor {
    schema: SchemaProvider,
    synthesizer: SqlSynthesizer,
    critic: ReflectionCritic,
    sql: SqlExecutor,
    timeout: Duration,
}

impl CapabilityExecutor {
    pub fn new(
        schema: SchemaProvider,
        synthesizer: SqlSynthesizer,
        critic: ReflectionCritic,
        sql: SqlExecutor,
        timeout_secs: u64,
    ) -> Self {
        Self {
            schema,
            synthesizer,
            critic,
            sql,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.sql.mode()
    }

    pub fn schema(&self) -> &SchemaProvider {
        &self.schema
    }

    pub fn sql(&self) -> &SqlExecutor {
        &self.sql
    }

    /// 执行一次调用；超时转为对应能力的失败结果
    pub async fn execute(&self, call: &CapabilityCall) -> CapabilityOutput {
        let start = Instant::now();
        let result = timeout(self.timeout, self.dispatch(&call.capability)).await;
        let (output, outcome) = match result {
            Ok(output) => {
                let outcome = if output.succeeded() { "ok" } else { "error" };
                (output, outcome)
            }
            Err(_) => (self.timed_out(&call.capability, start.elapsed()), "timeout"),
        };
        self.audit(call, &output, outcome, start.elapsed());
        output
    }

    /// 写入一条不经分派的结果（如置信度门槛拒绝）的审计日志
    pub fn audit_refusal(&self, call: &CapabilityCall, output: &CapabilityOutput) {
        self.audit(call, output, "refused", Duration::ZERO);
    }

    async fn dispatch(&self, capability: &Capability) -> CapabilityOutput {
        match capability {
            Capability::GenerateSql { question } => {
                let schema = self.schema.provide(question).await;
                CapabilityOutput::Synthesis(self.synthesizer.synthesize(question, &schema).await)
            }
            Capability::ReflectOnSql {
                sql_query,
                original_question,
            } => {
                let schema = self.schema.full_text();
                CapabilityOutput::Reflection(
                    self.critic.critique(sql_query, original_question, schema).await,
                )
            }
            Capability::ExecuteSqlWithAnalysis { sql_query } => {
                CapabilityOutput::Execution(self.sql.execute(sql_query).await)
            }
        }
    }

    fn timed_out(&self, capability: &Capability, elapsed: Duration) -> CapabilityOutput {
        let reason = format!("timed out after {} seconds", self.timeout.as_secs());
        match capability {
            Capability::GenerateSql { question } => {
                CapabilityOutput::Synthesis(SqlCandidate::failed(question.clone(), reason))
            }
            Capability::ReflectOnSql { .. } => {
                CapabilityOutput::Reflection(ReflectionVerdict::fallback(reason))
            }
            Capability::ExecuteSqlWithAnalysis { sql_query } => CapabilityOutput::Execution(
                QueryResult::failed(sql_query, reason, elapsed.as_secs_f64()),
            ),
        }
    }

    fn audit(&self, call: &CapabilityCall, output: &CapabilityOutput, outcome: &str, elapsed: Duration) {
        let audit = serde_json::json!({
            "event": "capability_audit",
            "tool": call.kind().name(),
            "call_id": call.id,
            "ok": output.succeeded(),
            "outcome": outcome,
            "duration_ms": elapsed.as_millis() as u64,
            "args_preview": args_preview(&call.capability),
        });
        tracing::info!(audit = %audit.to_string(), "capability");
    }
}

fn args_preview(capability: &Capability) -> String {
    let s = serde_json::to_value(capability)
        .ok()
        .and_then(|v| v.get("args").map(Value::to_string))
        .unwrap_or_default();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

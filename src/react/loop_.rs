//! ReAct 主循环
//!
//! Deciding -> Dispatching -> Deciding ... -> Done；由决策步数与 SQL 生成次数两个上限保证终止。
//! 服务端模式下执行前检查置信度门槛：该 SQL 在本次请求中最近一次反思须有效、符合意图且置信度达标。

use std::collections::HashMap;

use crate::core::{
    AgentError, LoopOutcome, LoopPhase, LoopSnapshot, RecoveryAction, RecoveryEngine,
};
use crate::memory::{ConversationMemory, Message};
use crate::react::{parse_decision, AgentDecision, Planner};
use crate::tools::{
    Capability, CapabilityCall, CapabilityExecutor, CapabilityOutput, QueryResult,
    ReflectionVerdict,
};

pub const DEFAULT_MAX_STEPS: usize = 12;
pub const DEFAULT_MAX_SQL_ATTEMPTS: usize = 3;
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 7;

/// 单次请求的上限
#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    /// 决策次数上限（含格式纠正重试）
    pub max_steps: usize,
    /// generate_sql 调用次数上限
    pub max_sql_attempts: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_sql_attempts: DEFAULT_MAX_SQL_ATTEMPTS,
        }
    }
}

/// 执行前的置信度门槛
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceGate {
    pub threshold: u8,
    pub enforced: bool,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            enforced: true,
        }
    }
}

/// 比较 SQL 时使用的规范形式：合并空白、去掉末尾分号、小写
pub fn normalize_sql(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').trim_end().to_lowercase()
}

/// 本次请求内的 SQL 生成次数与反思结论
#[derive(Debug, Default)]
pub struct RunLedger {
    sql_attempts: usize,
    verdicts: HashMap<String, ReflectionVerdict>,
    latest_sql: Option<String>,
}

impl RunLedger {
    pub fn sql_attempts(&self) -> usize {
        self.sql_attempts
    }

    /// 最近一次成功生成或成功执行的 SQL
    pub fn latest_sql(&self) -> Option<&str> {
        self.latest_sql.as_deref()
    }

    pub fn record(&mut self, capability: &Capability, output: &CapabilityOutput) {
        match (capability, output) {
            (Capability::GenerateSql { .. }, CapabilityOutput::Synthesis(candidate)) => {
                self.sql_attempts += 1;
                if let Some(sql) = candidate.sql() {
                    self.latest_sql = Some(sql.to_string());
                }
            }
            (Capability::ReflectOnSql { sql_query, .. }, CapabilityOutput::Reflection(verdict)) => {
                self.verdicts.insert(normalize_sql(sql_query), verdict.clone());
            }
            (Capability::ExecuteSqlWithAnalysis { sql_query }, CapabilityOutput::Execution(result))
                if result.success =>
            {
                self.latest_sql = Some(sql_query.clone());
            }
            _ => {}
        }
    }

    /// 门槛检查；未通过时返回拒绝原因
    pub fn check_gate(&self, sql: &str, gate: &ConfidenceGate) -> Result<(), String> {
        let Some(verdict) = self.verdicts.get(&normalize_sql(sql)) else {
            return Err("this query has not been reviewed with reflect_on_sql in this request".to_string());
        };
        if verdict.passes(gate.threshold) {
            Ok(())
        } else {
            Err(format!(
                "reflection did not pass (is_valid={}, matches_intent={}, confidence={}/10, required {})",
                verdict.is_valid, verdict.matches_intent, verdict.confidence, gate.threshold
            ))
        }
    }
}

/// ReAct 循环执行结果
#[derive(Debug)]
pub struct ReactResult {
    /// 最终回答（或上限用尽时的说明）
    pub response: String,
    pub outcome: LoopOutcome,
    /// 实际消耗的决策步数
    pub steps: usize,
    pub sql_attempts: usize,
    pub latest_sql: Option<String>,
}

/// ReAct 会话配置
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a CapabilityExecutor,
    pub recovery: &'a RecoveryEngine,
    pub limits: LoopLimits,
    pub gate: ConfidenceGate,
}

impl<'a> ReactSession<'a> {
    pub fn new(planner: &'a Planner, executor: &'a CapabilityExecutor, recovery: &'a RecoveryEngine) -> Self {
        Self {
            planner,
            executor,
            recovery,
            limits: LoopLimits::default(),
            gate: ConfidenceGate::default(),
        }
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_gate(mut self, gate: ConfidenceGate) -> Self {
        self.gate = gate;
        self
    }
}

fn attempts_exhausted_message(max: usize) -> String {
    format!("Could not produce a satisfactory query within {max} attempts.")
}

fn snapshot(phase: LoopPhase, step: usize, ledger: &RunLedger, pending: usize) {
    let snap = LoopSnapshot {
        phase,
        step,
        sql_attempts: ledger.sql_attempts(),
        pending_calls: pending,
    };
    tracing::debug!(snapshot = ?snap, "react loop");
}

/// 执行一次请求：写入用户问题，循环决策与分派直至最终回答或上限用尽
pub async fn react_loop(
    session: &ReactSession<'_>,
    memory: &mut ConversationMemory,
    user_input: &str,
) -> Result<ReactResult, AgentError> {
    memory.begin_turn(Message::user(user_input));

    let mut ledger = RunLedger::default();
    let mut phase = LoopPhase::Deciding;
    let mut pending: Vec<CapabilityCall> = Vec::new();
    let mut step = 0;
    let mut response = String::new();
    let mut outcome = LoopOutcome::Answered;

    loop {
        snapshot(phase, step, &ledger, pending.len());
        match phase {
            LoopPhase::Deciding => {
                if step >= session.limits.max_steps {
                    response = format!(
                        "Reached the step limit ({}) without a final answer.",
                        session.limits.max_steps
                    );
                    outcome = LoopOutcome::StepLimitReached;
                    memory.push(Message::assistant(response.clone()));
                    phase = LoopPhase::Done;
                    continue;
                }
                step += 1;

                let output = session.planner.decide(memory.messages()).await?;
                match parse_decision(&output) {
                    Ok(AgentDecision::Final(text)) => {
                        memory.push(Message::assistant(text.clone()));
                        response = text;
                        phase = LoopPhase::Done;
                    }
                    Ok(AgentDecision::Calls { text, calls }) => {
                        memory.push(Message::assistant_with_calls(text, calls.clone()));
                        pending = calls;
                        phase = LoopPhase::Dispatching;
                    }
                    Err(e) => match session.recovery.handle(&e) {
                        RecoveryAction::RetryWithPrompt(prompt) => {
                            tracing::warn!(error = %e, "invalid decision, asking the agent to retry");
                            memory.push(Message::assistant(output));
                            memory.push(Message::user(prompt));
                        }
                        RecoveryAction::Abort => return Err(e),
                    },
                }
            }
            LoopPhase::Dispatching => {
                let mut exhausted = false;
                for call in pending.drain(..) {
                    if exhausted {
                        let skipped = serde_json::json!({
                            "success": false,
                            "error": "skipped: SQL attempt limit reached",
                        });
                        memory.push(Message::tool_result(call.id, skipped.to_string()));
                        continue;
                    }
                    if matches!(call.capability, Capability::GenerateSql { .. })
                        && ledger.sql_attempts() >= session.limits.max_sql_attempts
                    {
                        exhausted = true;
                        let refused = serde_json::json!({
                            "success": false,
                            "error": attempts_exhausted_message(session.limits.max_sql_attempts),
                        });
                        memory.push(Message::tool_result(call.id, refused.to_string()));
                        continue;
                    }

                    let output = dispatch(session, &ledger, &call).await;
                    ledger.record(&call.capability, &output);
                    memory.push(Message::tool_result(call.id, output.to_json()));
                }

                if exhausted {
                    response = attempts_exhausted_message(session.limits.max_sql_attempts);
                    outcome = LoopOutcome::AttemptsExhausted;
                    memory.push(Message::assistant(response.clone()));
                    phase = LoopPhase::Done;
                } else {
                    phase = LoopPhase::Deciding;
                }
            }
            LoopPhase::Done => {
                tracing::info!(steps = step, sql_attempts = ledger.sql_attempts(), outcome = ?outcome, "request finished");
                return Ok(ReactResult {
                    response,
                    outcome,
                    steps: step,
                    sql_attempts: ledger.sql_attempts(),
                    latest_sql: ledger.latest_sql().map(String::from),
                });
            }
        }
    }
}

/// 分派一次调用；服务端执行前先过置信度门槛
async fn dispatch(session: &ReactSession<'_>, ledger: &RunLedger, call: &CapabilityCall) -> CapabilityOutput {
    if let Capability::ExecuteSqlWithAnalysis { sql_query } = &call.capability {
        if session.gate.enforced && session.executor.mode().allows_execution() {
            if let Err(reason) = ledger.check_gate(sql_query, &session.gate) {
                tracing::warn!(%reason, "execution refused by confidence gate");
                let output = CapabilityOutput::Execution(QueryResult::refused(sql_query, reason));
                session.executor.audit_refusal(call, &output);
                return output;
            }
        }
    }
    session.executor.execute(call).await
}

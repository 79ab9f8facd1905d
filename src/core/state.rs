//! 状态定义：编排循环阶段、请求结果与部署模式
//!
//! 单次请求在 Deciding / Dispatching / Done 三个阶段间流转；ExecutionMode 在进程启动时确定，之后不可变。

use serde::Serialize;

/// 编排循环阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Agent 审视消息日志，决定调用能力或给出最终回答
    Deciding,
    /// 执行本轮请求的全部能力调用并写回结果
    Dispatching,
    /// 已产生不含能力调用的回复
    Done,
}

/// 单次请求的终止方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    /// Agent 给出了最终回答
    Answered,
    /// SQL 生成次数用尽
    AttemptsExhausted,
    /// 决策步数用尽
    StepLimitReached,
}

impl LoopOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoopOutcome::Answered)
    }
}

/// 部署模式：服务端可直接执行 SQL，或仅返回经过反思的 SQL 由调用方执行
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    ServerSide,
    ClientSide,
}

impl ExecutionMode {
    pub fn from_flag(server_sql_exec: bool) -> Self {
        if server_sql_exec {
            ExecutionMode::ServerSide
        } else {
            ExecutionMode::ClientSide
        }
    }

    pub fn allows_execution(&self) -> bool {
        matches!(self, ExecutionMode::ServerSide)
    }
}

/// 循环内部快照（用于日志）
#[derive(Clone, Debug, Serialize)]
pub struct LoopSnapshot {
    pub phase: LoopPhase,
    pub step: usize,
    pub sql_attempts: usize,
    pub pending_calls: usize,
}

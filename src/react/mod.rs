//! 认知层：Planner（决策与解析）、system prompt、ReAct 主循环

pub mod loop_;
pub mod planner;
pub mod prompts;

pub use loop_::{
    normalize_sql, react_loop, ConfidenceGate, LoopLimits, ReactResult, ReactSession, RunLedger,
};
pub use planner::{parse_decision, AgentDecision, Planner};
pub use prompts::system_prompt;

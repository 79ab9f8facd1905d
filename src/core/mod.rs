//! 核心层：错误与恢复、循环状态与部署模式、组件装配

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{build_components, create_llm_from_config, AgentComponents};
pub use recovery::RecoveryEngine;
pub use state::{ExecutionMode, LoopOutcome, LoopPhase, LoopSnapshot};

//! SQL Reflect - 自然语言商业问题 → 经过反思的 SQL（可选服务端执行）
//!
//! 模块划分：
//! - **agent**: SqlAgent 运行时（chat / status），供命令行与 HTTP 前端调用
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、循环状态与部署模式、组件装配
//! - **llm**: LLM 与嵌入客户端抽象（OpenAI 兼容 / 重试包装 / 脚本客户端）
//! - **memory**: 线程消息日志与保留策略
//! - **react**: Planner、system prompt、ReAct 主循环与置信度门槛
//! - **response**: 请求/响应模型与响应组装
//! - **schema**: 结构自省、向量索引与静态结构
//! - **tools**: SQL 生成、反思、执行三种能力与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod response;
pub mod schema;
pub mod tools;

pub use agent::SqlAgent;
pub use response::{ChatRequest, ChatResponse};

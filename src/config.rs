//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SQLREFLECT__*` 覆盖（双下划线表示嵌套，如 `SQLREFLECT__AGENT__MAX_STEPS=8`）。
//! 兼容旧变量：`ENABLE_SERVER_SQL_EXEC`（仅 true 开启）决定部署模式，`DB_PATH` 指定数据库文件。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::ExecutionMode;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub database: DatabaseSection,
    pub schema: SchemaSection,
    pub agent: AgentSection,
    pub memory: MemorySection,
    pub web: WebSection,
}

impl AppConfig {
    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::from_flag(self.app.server_sql_exec)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 是否允许服务端执行 SQL；默认关闭（只返回 SQL）
    pub server_sql_exec: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    /// 为空时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.0,
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

impl LlmSection {
    /// 配置中的 key 优先，其次 OPENAI_API_KEY；空串视为缺失
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// SQLite 数据库文件（仅服务端模式使用）
    pub path: PathBuf,
    pub query_timeout_secs: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/bi.db"),
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaSection {
    /// 结构向量索引的持久化路径
    pub index_path: PathBuf,
    /// 每次检索返回的表文档数
    pub top_k: usize,
    /// 静态结构描述文件；未配置时使用内置描述
    pub static_schema_path: Option<PathBuf>,
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("data/schema_index.json"),
            top_k: 3,
            static_schema_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单次请求最多的决策步数
    pub max_steps: usize,
    /// 单次请求最多调用 generate_sql 的次数
    pub max_sql_attempts: usize,
    /// 允许执行所需的最低反思置信度（1-10）
    pub confidence_threshold: u8,
    /// 为 false 时执行前不检查反思结论
    pub enforce_confidence_gate: bool,
    pub capability_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 12,
            max_sql_attempts: 3,
            confidence_threshold: 7,
            enforce_confidence_gate: true,
            capability_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 每个线程保留的最多消息数
    pub max_messages: usize,
    /// 线程闲置多久后可被清理（秒）
    pub thread_ttl_secs: i64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_messages: 200,
            thread_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
    /// 闲置线程清理间隔（秒）
    pub eviction_interval_secs: u64,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            port: 8000,
            eviction_interval_secs: 60,
        }
    }
}

/// 解析开关：仅 "true"（大小写不敏感）为真，其余一律为假
pub fn parse_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// 用旧环境变量覆盖配置
fn apply_legacy_env(cfg: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(flag) = lookup("ENABLE_SERVER_SQL_EXEC") {
        cfg.app.server_sql_exec = parse_flag(&flag);
    }
    if let Some(path) = lookup("DB_PATH").filter(|p| !p.trim().is_empty()) {
        cfg.database.path = PathBuf::from(path);
    }
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SQLREFLECT")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    apply_legacy_env(&mut cfg, |k| std::env::var(k).ok());
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.execution_mode(), ExecutionMode::ClientSide);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.schema.top_k, 3);
        assert_eq!(cfg.agent.max_sql_attempts, 3);
        assert_eq!(cfg.agent.confidence_threshold, 7);
        assert!(cfg.agent.enforce_confidence_gate);
        assert_eq!(cfg.memory.max_messages, 200);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" true "));
        assert!(!parse_flag("1"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag("on"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("nope"));
    }

    #[test]
    fn test_legacy_env_overrides() {
        let env: HashMap<&str, &str> = [("ENABLE_SERVER_SQL_EXEC", "True"), ("DB_PATH", "/tmp/shop.db")].into();
        let mut cfg = AppConfig::default();
        apply_legacy_env(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.execution_mode(), ExecutionMode::ServerSide);
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/shop.db"));
    }

    #[test]
    fn test_legacy_numeric_flag_stays_client_side() {
        let env: HashMap<&str, &str> = [("ENABLE_SERVER_SQL_EXEC", "1")].into();
        let mut cfg = AppConfig::default();
        cfg.app.server_sql_exec = true;
        apply_legacy_env(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.execution_mode(), ExecutionMode::ClientSide);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[agent]\nmax_steps = 5\n\n[app]\nserver_sql_exec = true\n").unwrap();
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.agent.max_steps, 5);
        assert_eq!(cfg.agent.max_sql_attempts, 3);
        assert!(cfg.app.server_sql_exec);
    }
}

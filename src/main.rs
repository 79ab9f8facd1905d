//! SQL Reflect 命令行前端
//!
//! 从标准输入逐行读取问题，每个问题输出一份 JSON 响应；输入 exit / quit 退出。
//! 用法: sql-reflect [config.toml]，线程 id 可用 SQLREFLECT_THREAD 指定。

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use sql_reflect::config::{load_config, AppConfig};
use sql_reflect::observability;
use sql_reflect::response::ChatRequest;
use sql_reflect::SqlAgent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    observability::init();

    let cfg = load_config(std::env::args().nth(1).map(PathBuf::from)).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let agent = SqlAgent::from_config(&cfg)
        .await
        .context("Failed to create agent")?;
    let thread_id = std::env::var("SQLREFLECT_THREAD").unwrap_or_else(|_| "cli".to_string());
    tracing::info!(mode = ?agent.mode(), %thread_id, "ready, type a question");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        match agent.chat(&ChatRequest::new(question, thread_id.as_str())).await {
            Ok(resp) => println!("{}", serde_json::to_string_pretty(&resp)?),
            Err(e) => eprintln!("Agent chat failed: {e}"),
        }
    }
    Ok(())
}

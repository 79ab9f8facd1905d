//! SQL Reflect HTTP 服务
//!
//! 启动: cargo run --bin sql-reflect-web --features web
//! 接口: GET / 、GET /status 、GET /api/health 、POST /api/chat

#![cfg(feature = "web")]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use sql_reflect::config::{load_config, AppConfig};
use sql_reflect::observability;
use sql_reflect::response::{ChatRequest, ChatResponse, StatusReport};
use sql_reflect::SqlAgent;

struct AppState {
    agent: SqlAgent,
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "SQL Reflect agent is running. POST /api/chat to ask a question." }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.agent.status().await)
}

/// POST /api/chat：{"message": "...", "thread_id": "..."}；失败时 500 + {"detail": "..."}
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<Value>)> {
    state.agent.chat(&req).await.map(Json).map_err(|e| {
        tracing::error!(thread_id = %req.thread_id, error = %e, "chat failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("Agent chat failed: {e}") })),
        )
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let agent = SqlAgent::from_config(&cfg).await?;
    tracing::info!(mode = ?agent.mode(), "agent ready");
    let state = Arc::new(AppState { agent });

    let app = Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/chat", post(api_chat))
        .with_state(Arc::clone(&state));

    // 定期清理闲置线程
    let eviction_state = Arc::clone(&state);
    let every = Duration::from_secs(cfg.web.eviction_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            eviction_state.agent.threads().evict_expired().await;
        }
    });

    let port = std::env::var("SQLREFLECT_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.web.port);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("SQL Reflect API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

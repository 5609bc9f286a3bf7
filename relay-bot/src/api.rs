//! HTTP API - 登録済みコマンドとディスパッチ統計の参照

use axum::{
    extract::State,
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::registry::CommandRegistry;
use crate::stats::{DispatchStats, StatsSnapshot};

/// APIサーバーの共有状態
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<CommandRegistry>,
    pub stats: Arc<DispatchStats>,
}

/// ヘルスチェックレスポンス
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    commands: usize,
}

/// コマンド一覧の1件
#[derive(Debug, Serialize)]
pub struct CommandSummary {
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub options: usize,
    pub origin: Option<String>,
}

/// APIルーターを作成
pub fn create_router(state: ApiState) -> Router {
    // 参照系のみ
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/commands", get(list_commands))
        .route("/api/stats", get(stats))
        .layer(cors)
        .with_state(Arc::new(state))
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commands: state.registry.len(),
    })
}

async fn list_commands(State(state): State<Arc<ApiState>>) -> Json<Vec<CommandSummary>> {
    let commands = state
        .registry
        .all()
        .into_iter()
        .map(|d| CommandSummary {
            name: d.name().to_string(),
            description: d.description().to_string(),
            category: d.category().map(str::to_string),
            options: d.schema.options.len(),
            origin: d.origin.as_ref().map(|o| o.to_string()),
        })
        .collect();

    Json(commands)
}

async fn stats(State(state): State<Arc<ApiState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// APIサーバーを起動
pub async fn start_server(state: ApiState, port: u16) {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);

    info!("API server starting on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {}", e);
    }
}

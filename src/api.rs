//! 运维 HTTP 接口模块
//! Operational HTTP surface module
//!
//! 提供监控与手动触发端点：
//! Monitoring and manual-trigger endpoints:
//! - `GET /health` - 存储与锁可达且热循环在三个节拍内跳动过时返回 200
//!   200 when the stores and locks respond and the hot loop ticked recently
//! - `GET /stats` - 两层的条目计数与循环状态
//!   entry counts for both tiers and loop state
//! - `POST /sync` - 强制执行一轮转移（仍受租约约束）
//!   force one transfer pass (still lease-guarded)
//! - `POST /cleanup` - 强制执行一轮清理
//!   force one cleanup pass
//! - `GET /metrics` - Prometheus 文本格式指标
//!   metrics in the Prometheus text format

use crate::components::healthcheck::Healthcheck;
use crate::components::janitor::Janitor;
use crate::components::transfer::TransferLoop;
use crate::error::Result;
use crate::inspector::Inspector;
use crate::metrics::SchedulerMetrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 各端点共享的句柄
/// Handles shared by the endpoints
#[derive(Clone)]
pub struct ApiState {
  pub inspector: Arc<Inspector>,
  pub healthcheck: Arc<Healthcheck>,
  pub transfer: Arc<TransferLoop>,
  pub janitor: Arc<Janitor>,
  pub metrics: Arc<SchedulerMetrics>,
}

#[derive(Serialize)]
struct HealthResponse {
  status: &'static str,
}

#[derive(Serialize)]
struct SyncResponse {
  promoted: u64,
}

#[derive(Serialize)]
struct CleanupResponse {
  removed: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
  error: String,
}

async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
  if state.healthcheck.check().await {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
  } else {
    (
      StatusCode::SERVICE_UNAVAILABLE,
      Json(HealthResponse {
        status: "unavailable",
      }),
    )
  }
}

async fn get_stats(State(state): State<ApiState>) -> axum::response::Response {
  match state.inspector.stats().await {
    Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
    Err(e) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ErrorResponse {
        error: e.to_string(),
      }),
    )
      .into_response(),
  }
}

async fn post_sync(State(state): State<ApiState>) -> axum::response::Response {
  match state.transfer.run_once().await {
    Ok(promoted) => (StatusCode::OK, Json(SyncResponse { promoted })).into_response(),
    Err(e) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ErrorResponse {
        error: e.to_string(),
      }),
    )
      .into_response(),
  }
}

async fn post_cleanup(State(state): State<ApiState>) -> axum::response::Response {
  match state.janitor.run_once().await {
    Ok(removed) => (StatusCode::OK, Json(CleanupResponse { removed })).into_response(),
    Err(e) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ErrorResponse {
        error: e.to_string(),
      }),
    )
      .into_response(),
  }
}

async fn get_metrics(State(state): State<ApiState>) -> String {
  state.metrics.render()
}

/// 构建路由
/// Build the router
pub fn router(state: ApiState) -> axum::Router {
  axum::Router::new()
    .route("/health", get(get_health))
    .route("/stats", get(get_stats))
    .route("/sync", post(post_sync))
    .route("/cleanup", post(post_cleanup))
    .route("/metrics", get(get_metrics))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 绑定地址并提供服务
/// Bind the address and serve
pub async fn serve(addr: std::net::SocketAddr, state: ApiState) -> Result<()> {
  let listener = tokio::net::TcpListener::bind(addr).await?;
  tracing::info!("Operational API listening on {}", addr);
  axum::serve(listener, router(state)).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_shapes_serialize() {
    let sync = serde_json::to_value(SyncResponse { promoted: 3 }).unwrap();
    assert_eq!(sync["promoted"], 3);

    let cleanup = serde_json::to_value(CleanupResponse { removed: 7 }).unwrap();
    assert_eq!(cleanup["removed"], 7);
  }
}

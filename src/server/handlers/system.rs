// 健康检查与准入通道状态

use crate::common::ChannelStats;
use crate::server::handlers::ApiResponse;
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "filebed-rust".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// 准入通道快照
///
/// GET /api/admission
pub async fn admission_stats(State(state): State<AppState>) -> Json<ApiResponse<Vec<ChannelStats>>> {
    Json(ApiResponse::success(state.admission.snapshot()))
}

// Web服务器模块

pub mod error;
pub mod handlers;
pub mod hotlink;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

/// 构建路由
///
/// 不包含 Trace/CORS 层，由调用方按部署环境添加
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_size;

    let api_routes = Router::new()
        // 中转发送
        .route("/telegram/send", post(handlers::send_file))
        .route("/telegram/url", post(handlers::send_url))
        // 直传
        .route("/ipfs/send", post(handlers::send_ipfs))
        .route("/admission", get(handlers::admission_stats));

    Router::new()
        .nest("/api", api_routes)
        .route("/file/*path", get(handlers::proxy_file))
        .route("/ipfs/crossbell/*path", get(handlers::proxy_crossbell))
        .route("/ipfs/pinme/*path", get(handlers::proxy_pinme))
        .route("/health", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            hotlink::hotlink_guard,
        ))
        .with_state(state)
}

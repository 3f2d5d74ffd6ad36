// 文件代理路由
//
// 上游响应体以流的形式原样转发，不在内存中缓冲

use crate::common::UploadError;
use crate::server::{ApiError, ApiResult, AppState};
use crate::telegram::file_type::is_media_path;
use crate::telegram::mime_from_name;
use crate::uploader::task::url_file_name;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

const TELEGRAPH_FILE_BASE: &str = "https://telegra.ph/file";
const TELEGRAPH_REFERER: &str = "https://telegra.ph/";
const TELEGRAM_REFERER: &str = "https://api.telegram.com/";

/// Telegram 文件缓存一天
const FILE_CACHE_CONTROL: &str = "public, max-age=86400";
/// 内容寻址的文件不会变化
const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const OCTET_STREAM: &str = "application/octet-stream";

/// Content-Type 取值顺序：扩展名表 > 上游响应头 > octet-stream
pub fn resolve_content_type(file_name: &str, upstream: Option<&str>) -> String {
    mime_from_name(file_name)
        .or(upstream.filter(|v| !v.is_empty()))
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// `{gateway}/{cid}/...`
pub fn crossbell_url(gateway: &str, path: &str) -> String {
    format!("{}/{}", gateway.trim_end_matches('/'), path)
}

/// `{short}/{rest}` -> `https://{short}.{suffix}/{rest}`
pub fn pinme_url(path: &str, suffix: &str) -> String {
    let (short, rest) = path.split_once('/').unwrap_or((path, ""));
    format!("https://{}.{}/{}", short, suffix, rest)
}

fn upstream_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn stream_response(
    upstream: reqwest::Response,
    content_type: String,
    cache_control: &'static str,
) -> Response {
    let body = Body::from_stream(upstream.bytes_stream());
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control.to_string()),
        ],
        body,
    )
        .into_response()
}

fn require_path(path: &str, message: &str) -> ApiResult<String> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Err(ApiError::bad_request(message));
    }
    Ok(path.to_string())
}

/// Telegram 文件代理
///
/// GET /file/*path
pub async fn proxy_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let path = require_path(&path, "file_id 必传")?;

    let (url, file_name, referer) = if is_media_path(&path) {
        (
            format!("{}/{}", TELEGRAPH_FILE_BASE, path),
            url_file_name(&path),
            TELEGRAPH_REFERER,
        )
    } else {
        let file_path = state
            .telegram
            .get_file_path(&path)
            .await
            .map_err(|e| {
                error!("getFile 失败: file_id={}, {}", path, e);
                ApiError::from(e)
            })?
            .ok_or_else(|| ApiError::not_found("file_path 未找到"))?;
        (
            state.telegram.file_url(&file_path),
            url_file_name(&file_path),
            TELEGRAM_REFERER,
        )
    };

    debug!("代理文件: {} -> {}", path, file_name);
    let upstream = state.telegram.download(&url, referer).await.map_err(|e| {
        error!("Telegram 代理接口错误: {}", e);
        ApiError::from(e)
    })?;

    let content_type = resolve_content_type(&file_name, upstream_content_type(&upstream).as_deref());
    Ok(stream_response(upstream, content_type, FILE_CACHE_CONTROL))
}

async fn fetch_gateway(state: &AppState, url: &str) -> Result<reqwest::Response, UploadError> {
    let response = state
        .proxy_client
        .get(url)
        .send()
        .await
        .map_err(UploadError::from_reqwest)?;
    response.error_for_status().map_err(UploadError::from_reqwest)
}

async fn proxy_immutable(state: &AppState, url: String, label: &str) -> ApiResult<Response> {
    debug!("[{} Proxy] {}", label, url);
    let upstream = fetch_gateway(state, &url).await.map_err(|e| {
        error!("[{} Proxy] 获取文件失败: {}: {}", label, url, e);
        ApiError::from(e)
    })?;

    let content_type = upstream_content_type(&upstream).unwrap_or_else(|| OCTET_STREAM.to_string());
    Ok(stream_response(upstream, content_type, IMMUTABLE_CACHE_CONTROL))
}

/// GET /ipfs/crossbell/*path
pub async fn proxy_crossbell(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let path = require_path(&path, "CID is required")?;
    let url = crossbell_url(&state.config.ipfs.gateway_url, &path);
    proxy_immutable(&state, url, "Crossbell").await
}

/// GET /ipfs/pinme/*path
pub async fn proxy_pinme(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let path = require_path(&path, "PinMe shortUrl is required")?;
    let url = pinme_url(&path, &state.config.ipfs.pinme_gateway_suffix);
    proxy_immutable(&state, url, "PinMe").await
}

// 防盗链中间件
//
// 只对 /file/ 路径生效，且只在配置了白名单时生效

use crate::config::HotlinkConfig;
use crate::server::{ApiError, AppState};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

const GUARDED_PREFIX: &str = "/file/";

/// 判断请求是否允许访问
///
/// - host 需去掉端口后出现在 allow_hosts 中（未配置则不检查）
/// - Referer 的域名需出现在 allow_referers 中（未配置则不检查，缺失或无法解析视为不合法）
pub fn is_allowed(config: &HotlinkConfig, host: &str, referer: Option<&str>) -> bool {
    if !config.is_enabled() {
        return true;
    }

    let host = host.split(':').next().unwrap_or_default();
    let host_allowed = config.allow_hosts.is_empty() || config.allow_hosts.iter().any(|h| h == host);

    let referer_allowed = config.allow_referers.is_empty()
        || referer
            .and_then(|r| reqwest::Url::parse(r).ok())
            .and_then(|url| url.host_str().map(str::to_string))
            .map(|h| config.allow_referers.iter().any(|allowed| *allowed == h))
            .unwrap_or(false);

    host_allowed && referer_allowed
}

fn header_str<'a>(request: &'a Request, name: header::HeaderName) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// 防盗链中间件
pub async fn hotlink_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let config = &state.config.hotlink;
    if !config.is_enabled() || !request.uri().path().starts_with(GUARDED_PREFIX) {
        return next.run(request).await;
    }

    let host = header_str(&request, header::HOST)
        .or_else(|| request.uri().host())
        .unwrap_or_default()
        .to_string();
    let referer = header_str(&request, header::REFERER).map(str::to_string);

    if is_allowed(config, &host, referer.as_deref()) {
        return next.run(request).await;
    }

    warn!(
        "拒绝盗链请求: path={}, host={}, referer={}",
        request.uri().path(),
        host,
        referer.as_deref().unwrap_or("-")
    );
    placeholder(&state).await
}

/// 以占位图替换被拒绝的资源
async fn placeholder(state: &AppState) -> Response {
    let url = &state.config.hotlink.placeholder_url;
    let upstream = match state.proxy_client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            debug!("占位图返回 HTTP {}", resp.status().as_u16());
            return ApiError::not_found("Placeholder image not found").into_response();
        }
        Err(e) => {
            debug!("占位图获取失败: {}", e);
            return ApiError::not_found("Placeholder image not found").into_response();
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/webp"),
            (header::CACHE_CONTROL, "public, max-age=0"),
        ],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hosts: &[&str], referers: &[&str]) -> HotlinkConfig {
        HotlinkConfig {
            allow_hosts: hosts.iter().map(|s| s.to_string()).collect(),
            allow_referers: referers.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_allows_everything() {
        assert!(is_allowed(&config(&[], &[]), "evil.test", None));
    }

    #[test]
    fn test_host_check_strips_port() {
        let cfg = config(&["img.example.com"], &[]);
        assert!(is_allowed(&cfg, "img.example.com:8443", None));
        assert!(!is_allowed(&cfg, "other.example.com", None));
    }

    #[test]
    fn test_referer_check() {
        let cfg = config(&[], &["blog.example.com"]);
        assert!(is_allowed(
            &cfg,
            "anything",
            Some("https://blog.example.com/post/1")
        ));
        assert!(!is_allowed(&cfg, "anything", Some("https://evil.test/")));
        // 缺失或无法解析的 Referer 一律拒绝
        assert!(!is_allowed(&cfg, "anything", None));
        assert!(!is_allowed(&cfg, "anything", Some("not a url")));
    }

    #[test]
    fn test_both_lists_must_pass() {
        let cfg = config(&["img.example.com"], &["blog.example.com"]);
        assert!(is_allowed(
            &cfg,
            "img.example.com",
            Some("https://blog.example.com/")
        ));
        assert!(!is_allowed(
            &cfg,
            "cdn.example.com",
            Some("https://blog.example.com/")
        ));
    }
}

//! 上传链路错误类型
//!
//! 编排层（队列、准入通道、重试、分片会话）统一使用 `UploadError`，
//! 应用边缘（配置加载、服务启动、命令行）继续使用 anyhow

use serde::Serialize;
use thiserror::Error;

/// 上传链路错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// 存储盘与载荷类型组合不受支持（不发起任何网络请求）
    #[error("不支持的上传组合: disk={disk}, type={kind}")]
    UnsupportedCombination { disk: String, kind: String },

    /// 准入通道等待队列已满，调用方应稍后重试
    #[error("通道 {channel} 等待请求过多，请稍后再试")]
    TooManyPending { channel: String },

    /// 网络层错误
    #[error("网络错误: {0}")]
    Transport(String),

    /// 上游返回非成功状态或响应体
    #[error("上游拒绝请求{}: {message}", .code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    UpstreamRejected { code: Option<i64>, message: String },

    /// 请求超时或轮询次数耗尽
    #[error("超时: {0}")]
    Timeout(String),

    /// 载荷无效（超大文件、缺失必填字段等）
    #[error("无效载荷: {0}")]
    InvalidPayload(String),
}

/// 错误类别（用于日志与序列化展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    UnsupportedCombination,
    TooManyPending,
    Transport,
    UpstreamRejected,
    Timeout,
    InvalidPayload,
}

/// 可由重试策略判断是否值得再次尝试的错误
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::UnsupportedCombination { .. } => UploadErrorKind::UnsupportedCombination,
            UploadError::TooManyPending { .. } => UploadErrorKind::TooManyPending,
            UploadError::Transport(_) => UploadErrorKind::Transport,
            UploadError::UpstreamRejected { .. } => UploadErrorKind::UpstreamRejected,
            UploadError::Timeout(_) => UploadErrorKind::Timeout,
            UploadError::InvalidPayload(_) => UploadErrorKind::InvalidPayload,
        }
    }

    /// 上游拒绝（无错误码）
    pub fn rejected(message: impl Into<String>) -> Self {
        UploadError::UpstreamRejected {
            code: None,
            message: message.into(),
        }
    }

    /// 从 reqwest 错误转换
    ///
    /// 超时与其他网络错误是两种不同的错误类别
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UploadError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            UploadError::UpstreamRejected {
                code: Some(status.as_u16() as i64),
                message: err.to_string(),
            }
        } else {
            UploadError::Transport(err.to_string())
        }
    }

    /// 网关 JSON 响应中的业务码（与 HTTP 状态码相互独立）
    pub fn api_code(&self) -> i32 {
        match self {
            UploadError::UnsupportedCombination { .. } | UploadError::InvalidPayload(_) => 400,
            UploadError::TooManyPending { .. } => 429,
            UploadError::Transport(_) | UploadError::UpstreamRejected { .. } => 502,
            UploadError::Timeout(_) => 504,
        }
    }
}

impl Retriable for UploadError {
    fn is_retriable(&self) -> bool {
        matches!(
            self,
            UploadError::Transport(_)
                | UploadError::UpstreamRejected { .. }
                | UploadError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(UploadError::Transport("reset".into()).is_retriable());
        assert!(UploadError::Timeout("20s".into()).is_retriable());
        assert!(UploadError::rejected("429").is_retriable());

        assert!(!UploadError::TooManyPending {
            channel: "upload".into()
        }
        .is_retriable());
        assert!(!UploadError::InvalidPayload("too big".into()).is_retriable());
        assert!(!UploadError::UnsupportedCombination {
            disk: "ipfs".into(),
            kind: "url".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_api_codes() {
        assert_eq!(
            UploadError::TooManyPending {
                channel: "upload".into()
            }
            .api_code(),
            429
        );
        assert_eq!(UploadError::Timeout("x".into()).api_code(), 504);
        assert_eq!(UploadError::InvalidPayload("x".into()).api_code(), 400);
    }

    #[test]
    fn test_display_with_code() {
        let err = UploadError::UpstreamRejected {
            code: Some(400),
            message: "Bad Request: chat not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "上游拒绝请求 (400): Bad Request: chat not found"
        );
        assert_eq!(
            UploadError::rejected("busy").to_string(),
            "上游拒绝请求: busy"
        );
    }
}

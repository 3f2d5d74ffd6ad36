// API处理器模块

pub mod ipfs;
pub mod proxy;
pub mod system;
pub mod telegram;

pub use ipfs::*;
pub use proxy::*;
pub use system::*;
pub use telegram::*;

use serde::Serialize;

/// 统一 JSON 响应
///
/// `code` 是业务码，与 HTTP 状态码无关：成功为 200
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let ok = serde_json::to_value(ApiResponse::success(7)).unwrap();
        assert_eq!(ok, serde_json::json!({"code": 200, "msg": "ok", "data": 7}));

        // 失败时 data 为 null 而不是缺省
        let err = serde_json::to_value(ApiResponse::<u8>::error(500, "chatId 必填")).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"code": 500, "msg": "chatId 必填", "data": null})
        );
    }
}

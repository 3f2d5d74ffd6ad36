// Telegram Bot API 响应类型

use crate::common::UploadError;
use serde::{Deserialize, Serialize};

/// Bot API 统一响应
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

impl<T> TelegramResponse<T> {
    /// `ok: false` 转换为 UpstreamRejected
    pub fn into_result(self) -> Result<T, UploadError> {
        if !self.ok {
            return Err(UploadError::UpstreamRejected {
                code: self.error_code,
                message: self
                    .description
                    .unwrap_or_else(|| "Telegram 返回失败".to_string()),
            });
        }
        self.result
            .ok_or_else(|| UploadError::rejected("Telegram 响应缺少 result"))
    }
}

/// 文件对象（photo 数组元素、video、document 等共用）
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TgFile {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// 发送文件后返回的消息（只关心附件字段）
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub photo: Option<Vec<TgFile>>,
    pub video: Option<TgFile>,
    pub animation: Option<TgFile>,
    pub audio: Option<TgFile>,
    pub document: Option<TgFile>,
}

/// getFile 结果
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TgFilePath {
    pub file_id: String,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
}

/// 对外返回的文件信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDetails {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
}

impl From<&TgFile> for FileDetails {
    fn from(file: &TgFile) -> Self {
        Self {
            file_id: file.file_id.clone(),
            file_name: file
                .file_name
                .clone()
                .unwrap_or_else(|| file.file_unique_id.clone()),
            file_size: file.file_size.unwrap_or(0),
        }
    }
}

/// 从消息中提取文件信息
///
/// 优先级: 最大的 photo > video > animation > audio > document
pub fn file_details(message: &Message) -> Option<FileDetails> {
    if let Some(photos) = &message.photo {
        if let Some(largest) = photos
            .iter()
            .max_by_key(|p| p.file_size.unwrap_or(0))
        {
            return Some(largest.into());
        }
    }

    [
        &message.video,
        &message.animation,
        &message.audio,
        &message.document,
    ]
    .into_iter()
    .find_map(|f| f.as_ref().map(FileDetails::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_photo_selected() {
        let json = r#"{
            "ok": true,
            "result": {
                "message_id": 1,
                "photo": [
                    {"file_id": "small", "file_unique_id": "u1", "file_size": 100},
                    {"file_id": "large", "file_unique_id": "u3", "file_size": 9000},
                    {"file_id": "mid", "file_unique_id": "u2", "file_size": 800}
                ]
            }
        }"#;
        let resp: TelegramResponse<Message> = serde_json::from_str(json).unwrap();
        let details = file_details(&resp.into_result().unwrap()).unwrap();
        assert_eq!(details.file_id, "large");
        // 没有 file_name 时使用 file_unique_id
        assert_eq!(details.file_name, "u3");
        assert_eq!(details.file_size, 9000);
    }

    #[test]
    fn test_document_with_name() {
        let message = Message {
            document: Some(TgFile {
                file_id: "doc".into(),
                file_unique_id: "ud".into(),
                file_name: Some("report.pdf".into()),
                file_size: Some(12),
            }),
            ..Default::default()
        };
        let details = file_details(&message).unwrap();
        assert_eq!(details.file_name, "report.pdf");
        assert!(file_details(&Message::default()).is_none());
    }

    #[test]
    fn test_video_preferred_over_document() {
        let file = |id: &str| TgFile {
            file_id: id.into(),
            file_unique_id: id.into(),
            file_name: None,
            file_size: None,
        };
        let message = Message {
            video: Some(file("v")),
            document: Some(file("d")),
            ..Default::default()
        };
        assert_eq!(file_details(&message).unwrap().file_id, "v");
    }

    #[test]
    fn test_error_response() {
        let json = r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#;
        let resp: TelegramResponse<Message> = serde_json::from_str(json).unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(
            err,
            UploadError::UpstreamRejected {
                code: Some(400),
                message: "Bad Request: chat not found".into()
            }
        );
    }
}

// IPFS 存储的请求/响应类型

use crate::uploader::UploadResult;
use serde::{Deserialize, Serialize};

/// 分片 API 统一响应 `{code, msg, data}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// 初始化请求
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkInitRequest {
    pub file_name: String,
    pub file_size: u64,
    /// 小写十六进制 MD5
    pub md5: String,
    pub is_directory: bool,
    pub uid: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChunkInitData {
    pub chunk_size: u64,
    pub session_id: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChunkUploadData {
    pub chunk_index: u32,
    #[serde(default)]
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkCompleteRequest {
    pub session_id: String,
    pub uid: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChunkCompleteData {
    pub trace_id: String,
}

/// 存储完成后的结果（字段名沿用服务端的大写风格）
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadRst {
    #[serde(rename = "Bytes", default)]
    pub bytes: u64,
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Size", default)]
    pub size: String,
    #[serde(rename = "ShortUrl", default)]
    pub short_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadStatusData {
    #[serde(default)]
    pub trace_id: String,
    pub upload_rst: Option<UploadRst>,
    #[serde(default)]
    pub is_ready: bool,
}

/// 分片上传最终结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinMeUploadResult {
    pub hash: String,
    pub name: String,
    pub short_url: String,
    pub size: String,
    pub trace_id: String,
}

impl PinMeUploadResult {
    pub fn from_rst(rst: UploadRst, trace_id: String) -> Self {
        Self {
            hash: rst.hash,
            name: rst.name,
            short_url: rst.short_url,
            size: rst.size,
            trace_id,
        }
    }

    /// 转换为通用上传结果，服务端未给出大小时使用本地字节数
    pub fn into_upload_result(self, local_size: u64) -> UploadResult {
        let file_size = self.size.trim().parse::<u64>().unwrap_or(local_size);
        let short_url = Some(self.short_url).filter(|s| !s.is_empty());
        UploadResult {
            file_id: self.hash.clone(),
            file_name: self.name,
            file_size,
            cid: Some(self.hash),
            short_url,
        }
    }
}

/// 直传中继响应
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DirectUploadResponse {
    #[serde(default)]
    pub status: String,
    pub cid: Option<String>,
    pub url: Option<String>,
    pub web2url: Option<String>,
    #[serde(rename = "fileSize")]
    pub file_size: Option<u64>,
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
    pub message: Option<String>,
}

impl DirectUploadResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "success")
    }

    /// 转换为通用上传结果
    pub fn into_result(self, name: &str, size: u64) -> UploadResult {
        let file_id = self
            .cid
            .clone()
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| "unknown".to_string());
        UploadResult {
            file_id,
            file_name: self.file_name.unwrap_or_else(|| name.to_string()),
            file_size: self.file_size.unwrap_or(size),
            cid: self.cid,
            short_url: None,
        }
    }
}

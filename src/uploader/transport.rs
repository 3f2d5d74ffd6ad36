// 上传分发
//
// 存储盘 × 载荷类型 决定走哪条上传路径；不支持的组合和超限载荷
// 在发起任何网络请求之前就被拒绝

use crate::common::UploadError;
use crate::config::AppConfig;
use crate::ipfs::{
    ChunkedUploadSession, DirectIpfsClient, HttpChunkedApi, PollConfig, MAX_DIRECT_UPLOAD_SIZE,
};
use crate::telegram::file_type::{classify_mime, classify_url, TelegramFileType};
use crate::telegram::FileDetails;
use crate::uploader::task::{url_file_name, PayloadKind, ProgressReporter, UploadPayload, UploadResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 存储盘
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadDisk {
    /// 中转后端（Telegram Bot API）
    #[default]
    Telegram,
    /// 内容寻址存储直传
    Ipfs,
    /// 内容寻址存储分片上传
    PinMe,
}

impl fmt::Display for UploadDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadDisk::Telegram => "telegram",
            UploadDisk::Ipfs => "ipfs",
            UploadDisk::PinMe => "pinme",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for UploadDisk {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" | "tg" => Ok(UploadDisk::Telegram),
            "ipfs" | "crossbell" => Ok(UploadDisk::Ipfs),
            "pinme" => Ok(UploadDisk::PinMe),
            other => Err(format!("未知存储盘: {}", other)),
        }
    }
}

/// 上传传输层
///
/// 每个方法对应一条上传路径，进度通过 `ProgressReporter` 回写到任务
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 字节经网关中转到 Telegram
    async fn relay_bytes(
        &self,
        name: &str,
        mime: Option<&str>,
        data: Arc<Vec<u8>>,
        progress: ProgressReporter,
    ) -> Result<UploadResult, UploadError>;

    /// URL 经网关中转到 Telegram（由 Telegram 拉取）
    async fn relay_url(&self, url: &str, progress: ProgressReporter)
        -> Result<UploadResult, UploadError>;

    /// 直传内容寻址存储
    async fn store_bytes(
        &self,
        name: &str,
        data: Arc<Vec<u8>>,
        progress: ProgressReporter,
    ) -> Result<UploadResult, UploadError>;

    /// 分片上传内容寻址存储
    async fn store_chunked(
        &self,
        name: &str,
        data: Arc<Vec<u8>>,
        progress: ProgressReporter,
    ) -> Result<UploadResult, UploadError>;
}

/// 按存储盘和载荷类型分发一次上传
pub async fn dispatch(
    transport: &dyn UploadTransport,
    disk: UploadDisk,
    payload: &UploadPayload,
    progress: ProgressReporter,
) -> Result<UploadResult, UploadError> {
    match (disk, payload) {
        (UploadDisk::Ipfs | UploadDisk::PinMe, UploadPayload::Url(_)) => {
            Err(UploadError::UnsupportedCombination {
                disk: disk.to_string(),
                kind: PayloadKind::Url.to_string(),
            })
        }
        (_, UploadPayload::Url(url)) => {
            if url.trim().is_empty() {
                return Err(UploadError::InvalidPayload("URL 为空".to_string()));
            }
            transport.relay_url(url, progress).await
        }
        (_, UploadPayload::Bytes { data, .. }) if data.is_empty() => Err(
            UploadError::InvalidPayload(format!("文件为空: {}", payload.name())),
        ),
        (UploadDisk::Telegram, UploadPayload::Bytes { name, mime, data }) => {
            transport
                .relay_bytes(name, mime.as_deref(), data.clone(), progress)
                .await
        }
        (UploadDisk::Ipfs, UploadPayload::Bytes { name, data, .. }) => {
            if data.len() as u64 > MAX_DIRECT_UPLOAD_SIZE {
                return Err(UploadError::InvalidPayload(format!(
                    "文件太大: {} 字节，直传上限为 {} 字节",
                    data.len(),
                    MAX_DIRECT_UPLOAD_SIZE
                )));
            }
            transport.store_bytes(name, data.clone(), progress).await
        }
        (UploadDisk::PinMe, UploadPayload::Bytes { name, data, .. }) => {
            transport.store_chunked(name, data.clone(), progress).await
        }
    }
}

/// 网关 JSON 响应
#[derive(Debug, Deserialize)]
struct GatewayEnvelope {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<FileDetails>,
}

/// 基于 HTTP 的传输实现
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    gateway_url: String,
    chat_id: Option<String>,
    extra_form_data: HashMap<String, String>,
    direct: DirectIpfsClient,
    chunked: HttpChunkedApi,
    poll: PollConfig,
}

impl HttpTransport {
    /// 创建传输层
    ///
    /// `chat_id` 为空时由网关使用自身配置的默认会话
    pub fn new(config: &AppConfig, chat_id: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.upload.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            gateway_url: config.upload.gateway_url.trim_end_matches('/').to_string(),
            chat_id: chat_id.filter(|c| !c.trim().is_empty()),
            extra_form_data: config.upload.extra_form_data.clone(),
            direct: DirectIpfsClient::new(&config.ipfs)?,
            chunked: HttpChunkedApi::new(&config.ipfs)?,
            poll: config.ipfs.poll_config(),
        })
    }

    fn base_form(&self, file_type: &TelegramFileType) -> Form {
        let mut form = Form::new()
            .text("fileName", file_type.file_name.clone())
            .text("functionType", file_type.field)
            .text("functionName", file_type.method);
        if let Some(chat_id) = &self.chat_id {
            form = form.text("chatId", chat_id.clone());
        }
        for (key, value) in &self.extra_form_data {
            form = form.text(key.clone(), value.clone());
        }
        form
    }

    async fn post_gateway(&self, path: &str, form: Form) -> Result<UploadResult, UploadError> {
        let url = format!("{}{}", self.gateway_url, path);
        debug!("提交到网关: {}", url);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(UploadError::from_reqwest)?;

        let envelope: GatewayEnvelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) => {
                return Err(UploadError::UpstreamRejected {
                    code: Some(status.as_u16() as i64),
                    message: format!("HTTP {}", status.as_u16()),
                })
            }
        };

        if !status.is_success() || envelope.code != 200 {
            let message = if envelope.msg.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                envelope.msg
            };
            return Err(UploadError::UpstreamRejected {
                code: Some(envelope.code),
                message,
            });
        }

        let details = envelope
            .data
            .ok_or_else(|| UploadError::rejected("网关响应缺少文件信息"))?;

        Ok(UploadResult {
            file_id: details.file_id,
            file_name: details.file_name,
            file_size: details.file_size,
            cid: None,
            short_url: None,
        })
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn relay_bytes(
        &self,
        name: &str,
        mime: Option<&str>,
        data: Arc<Vec<u8>>,
        progress: ProgressReporter,
    ) -> Result<UploadResult, UploadError> {
        let file_type = classify_mime(name, mime);
        let len = data.len() as u64;

        let mut part = Part::stream_with_length(progress.wrap_body(data), len)
            .file_name(file_type.file_name.clone());
        if let Some(mime) = mime {
            part = part
                .mime_str(mime)
                .map_err(|e| UploadError::InvalidPayload(format!("无效 MIME 类型: {}", e)))?;
        }

        let form = self.base_form(&file_type).part("file", part);
        let result = self.post_gateway("/api/telegram/send", form).await?;
        info!("中转上传完成: {} -> {}", name, result.file_id);
        Ok(result)
    }

    async fn relay_url(
        &self,
        url: &str,
        progress: ProgressReporter,
    ) -> Result<UploadResult, UploadError> {
        let mut file_type = classify_url(url);
        file_type.file_name = url_file_name(url);

        let form = self.base_form(&file_type).text("file", url.to_string());
        let result = self.post_gateway("/api/telegram/url", form).await?;
        progress.report(100);
        info!("URL 中转完成: {} -> {}", url, result.file_id);
        Ok(result)
    }

    async fn store_bytes(
        &self,
        name: &str,
        data: Arc<Vec<u8>>,
        progress: ProgressReporter,
    ) -> Result<UploadResult, UploadError> {
        let size = data.len() as u64;
        let response = self.direct.upload(name, data, progress).await?;
        Ok(response.into_result(name, size))
    }

    async fn store_chunked(
        &self,
        name: &str,
        data: Arc<Vec<u8>>,
        progress: ProgressReporter,
    ) -> Result<UploadResult, UploadError> {
        let result =
            ChunkedUploadSession::run(&self.chunked, name, &data, &progress, self.poll).await?;
        Ok(result.into_upload_result(data.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 记录调用次数的传输层
    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicU32,
    }

    impl CountingTransport {
        fn ok(&self, name: &str) -> Result<UploadResult, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UploadResult {
                file_id: format!("id-{}", name),
                file_name: name.to_string(),
                file_size: 0,
                cid: None,
                short_url: None,
            })
        }
    }

    #[async_trait]
    impl UploadTransport for CountingTransport {
        async fn relay_bytes(
            &self,
            name: &str,
            _mime: Option<&str>,
            _data: Arc<Vec<u8>>,
            _progress: ProgressReporter,
        ) -> Result<UploadResult, UploadError> {
            self.ok(&format!("relay-{}", name))
        }

        async fn relay_url(
            &self,
            url: &str,
            _progress: ProgressReporter,
        ) -> Result<UploadResult, UploadError> {
            self.ok(&format!("url-{}", url_file_name(url)))
        }

        async fn store_bytes(
            &self,
            name: &str,
            _data: Arc<Vec<u8>>,
            _progress: ProgressReporter,
        ) -> Result<UploadResult, UploadError> {
            self.ok(&format!("store-{}", name))
        }

        async fn store_chunked(
            &self,
            name: &str,
            _data: Arc<Vec<u8>>,
            _progress: ProgressReporter,
        ) -> Result<UploadResult, UploadError> {
            self.ok(&format!("chunked-{}", name))
        }
    }

    fn file(name: &str, len: usize) -> UploadPayload {
        UploadPayload::bytes(name, None, vec![7u8; len])
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_disk_and_kind() {
        let t = CountingTransport::default();
        let p = ProgressReporter::noop();

        let r = dispatch(&t, UploadDisk::Telegram, &file("a.png", 3), p.clone()).await;
        assert_eq!(r.unwrap().file_id, "id-relay-a.png");

        let r = dispatch(
            &t,
            UploadDisk::Telegram,
            &UploadPayload::url("https://x.com/b.gif"),
            p.clone(),
        )
        .await;
        assert_eq!(r.unwrap().file_id, "id-url-b.gif");

        let r = dispatch(&t, UploadDisk::Ipfs, &file("c.png", 3), p.clone()).await;
        assert_eq!(r.unwrap().file_id, "id-store-c.png");

        let r = dispatch(&t, UploadDisk::PinMe, &file("d.png", 3), p).await;
        assert_eq!(r.unwrap().file_id, "id-chunked-d.png");

        assert_eq!(t.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_url_to_content_store_is_unsupported() {
        let t = CountingTransport::default();
        for disk in [UploadDisk::Ipfs, UploadDisk::PinMe] {
            let err = dispatch(
                &t,
                disk,
                &UploadPayload::url("https://x.com/a.png"),
                ProgressReporter::noop(),
            )
            .await
            .unwrap_err();
            assert_eq!(
                err,
                UploadError::UnsupportedCombination {
                    disk: disk.to_string(),
                    kind: "url".into()
                }
            );
        }
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversize_direct_upload_rejected_without_request() {
        let t = CountingTransport::default();
        let big = file("big.bin", MAX_DIRECT_UPLOAD_SIZE as usize + 1);

        let err = dispatch(&t, UploadDisk::Ipfs, &big, ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPayload(_)));
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);

        // 分片上传不受直传上限约束
        assert!(dispatch(&t, UploadDisk::PinMe, &big, ProgressReporter::noop())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_empty_payloads_rejected() {
        let t = CountingTransport::default();
        let err = dispatch(&t, UploadDisk::Telegram, &file("e.txt", 0), ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPayload(_)));

        let err = dispatch(
            &t,
            UploadDisk::Telegram,
            &UploadPayload::url("  "),
            ProgressReporter::noop(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPayload(_)));
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disk_parse_and_display() {
        assert_eq!("PinMe".parse::<UploadDisk>(), Ok(UploadDisk::PinMe));
        assert_eq!("tg".parse::<UploadDisk>(), Ok(UploadDisk::Telegram));
        assert_eq!("crossbell".parse::<UploadDisk>(), Ok(UploadDisk::Ipfs));
        assert!("s3".parse::<UploadDisk>().is_err());
        assert_eq!(UploadDisk::PinMe.to_string(), "pinme");
        assert_eq!(
            serde_json::to_string(&UploadDisk::PinMe).unwrap(),
            "\"pinme\""
        );
    }
}

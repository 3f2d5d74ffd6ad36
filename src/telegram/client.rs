// Telegram Bot API 客户端
//
// 所有出站请求都经过准入通道：
// - sendXxx 走 UPLOAD 通道，并在通道内按重试策略重试
// - getFile 走 REMOTE_FETCH 通道
// - 文件下载走 FILE_DOWNLOAD 通道，拿到响应头后即归还名额

use crate::common::{AdmissionRegistry, RetryPolicy, UploadError, FILE_DOWNLOAD, REMOTE_FETCH, UPLOAD};
use crate::config::TelegramConfig;
use crate::telegram::types::{Message, TelegramResponse, TgFilePath};
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 模拟浏览器的默认 UA
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 发送的文件内容
#[derive(Debug, Clone)]
pub enum SendFile {
    Bytes {
        data: Arc<Vec<u8>>,
        mime: Option<String>,
    },
    /// 由 Telegram 自行拉取的地址
    Url(String),
}

/// sendXxx 参数
#[derive(Debug, Clone)]
pub struct SendFileParams {
    pub chat_id: String,
    /// Bot API 方法名（sendPhoto 等）
    pub method: String,
    /// 表单字段名（photo 等）
    pub field: String,
    pub file: SendFile,
    pub file_name: Option<String>,
    pub caption: Option<String>,
}

impl SendFileParams {
    /// gif / webp 以 photo 发送时改名为 jpeg
    pub fn normalize_photo(mut self) -> Self {
        if self.field != "photo" {
            return self;
        }
        let Some(name) = self.file_name.as_deref() else {
            return self;
        };
        let lower = name.to_ascii_lowercase();
        let stem_len = if lower.ends_with(".gif") {
            name.len() - 4
        } else if lower.ends_with(".webp") {
            name.len() - 5
        } else {
            return self;
        };

        let renamed = format!("{}.jpeg", &name[..stem_len]);
        debug!("photo 文件改名: {} -> {}", name, renamed);
        self.file_name = Some(renamed);
        if let SendFile::Bytes { mime, .. } = &mut self.file {
            *mime = Some("image/jpeg".to_string());
        }
        self
    }
}

/// Telegram 客户端
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: Client,
    api_base: String,
    token: String,
    timeout: Duration,
    retry: RetryPolicy,
    admission: Arc<AdmissionRegistry>,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig, admission: Arc<AdmissionRegistry>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(100)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout: config.request_timeout(),
            retry: config.retry_policy(),
            admission,
        })
    }

    /// 替换重试策略
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    fn ensure_token(&self) -> Result<(), UploadError> {
        if self.has_token() {
            Ok(())
        } else {
            Err(UploadError::InvalidPayload(
                "Telegram Bot Token 未配置".to_string(),
            ))
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// 文件下载地址
    pub fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    /// 发送文件
    ///
    /// 准入在外、重试在内：通道排队失败不会被重试
    pub async fn send_file(&self, params: SendFileParams) -> Result<Message, UploadError> {
        self.ensure_token()?;
        if params.chat_id.trim().is_empty() {
            return Err(UploadError::InvalidPayload("chatId 必填".to_string()));
        }
        let params = params.normalize_photo();

        let message = self
            .admission
            .with_admission(UPLOAD, || self.retry.execute(|| self.send_once(&params)))
            .await?;

        info!(
            "Telegram {} 成功: chat_id={}, file={}",
            params.method,
            params.chat_id,
            params.file_name.as_deref().unwrap_or("file")
        );
        Ok(message)
    }

    async fn send_once(&self, params: &SendFileParams) -> Result<Message, UploadError> {
        // multipart 表单只能使用一次，每次尝试重新构建
        let file_name = params.file_name.clone().unwrap_or_else(|| "file".to_string());
        let mut form = Form::new().text("chat_id", params.chat_id.clone());

        form = match &params.file {
            SendFile::Bytes { data, mime } => {
                let mut part = Part::bytes(data.as_ref().clone()).file_name(file_name);
                if let Some(mime) = mime {
                    part = part.mime_str(mime).map_err(|e| {
                        UploadError::InvalidPayload(format!("无效 MIME 类型: {}", e))
                    })?;
                }
                form.part(params.field.clone(), part)
            }
            SendFile::Url(url) => form.text(params.field.clone(), url.clone()),
        };

        if let Some(caption) = &params.caption {
            form = form.text("caption", caption.clone());
        }

        debug!("调用 Telegram {}: chat_id={}", params.method, params.chat_id);
        let response = self
            .http
            .post(self.method_url(&params.method))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;

        Self::parse_response(response).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, UploadError> {
        let status = response.status();
        let text = response.text().await.map_err(UploadError::from_reqwest)?;

        // Telegram 在 4xx 时同样返回 {ok:false, error_code, description}
        match serde_json::from_str::<TelegramResponse<T>>(&text) {
            Ok(body) => body.into_result(),
            Err(_) if !status.is_success() => Err(UploadError::UpstreamRejected {
                code: Some(status.as_u16() as i64),
                message: format!("HTTP {}", status.as_u16()),
            }),
            Err(e) => Err(UploadError::Transport(format!("无法解析 Telegram 响应: {}", e))),
        }
    }

    /// 查询文件路径（getFile）
    pub async fn get_file_path(&self, file_id: &str) -> Result<Option<String>, UploadError> {
        self.ensure_token()?;

        self.admission
            .with_admission(REMOTE_FETCH, || async {
                let response = self
                    .http
                    .get(self.method_url("getFile"))
                    .query(&[("file_id", file_id)])
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(UploadError::from_reqwest)?;

                let file: TgFilePath = Self::parse_response(response).await?;
                Ok::<_, UploadError>(file.file_path)
            })
            .await
    }

    /// 流式下载
    ///
    /// 名额只保持到响应头返回；调用方负责把响应体转发出去
    pub async fn download(
        &self,
        url: &str,
        referer: &str,
    ) -> Result<reqwest::Response, UploadError> {
        self.admission
            .with_admission(FILE_DOWNLOAD, || async {
                let request = self.http.get(url).header(header::REFERER, referer).send();
                let response = tokio::time::timeout(self.timeout, request)
                    .await
                    .map_err(|_| {
                        warn!("下载响应头超时: {}s", self.timeout.as_secs());
                        UploadError::Timeout(format!("{}s 内未收到响应", self.timeout.as_secs()))
                    })?
                    .map_err(UploadError::from_reqwest)?;

                response.error_for_status().map_err(UploadError::from_reqwest)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Retriable;

    fn params(field: &str, name: &str) -> SendFileParams {
        SendFileParams {
            chat_id: "42".into(),
            method: "sendPhoto".into(),
            field: field.into(),
            file: SendFile::Bytes {
                data: Arc::new(vec![1, 2, 3]),
                mime: Some("image/gif".into()),
            },
            file_name: Some(name.into()),
            caption: None,
        }
    }

    #[test]
    fn test_photo_rename() {
        let p = params("photo", "Funny.GIF").normalize_photo();
        assert_eq!(p.file_name.as_deref(), Some("Funny.jpeg"));
        match p.file {
            SendFile::Bytes { mime, .. } => assert_eq!(mime.as_deref(), Some("image/jpeg")),
            SendFile::Url(_) => panic!("unexpected url"),
        }

        let p = params("photo", "a.webp").normalize_photo();
        assert_eq!(p.file_name.as_deref(), Some("a.jpeg"));

        // 非 photo 或其他扩展名保持不变
        let p = params("animation", "a.gif").normalize_photo();
        assert_eq!(p.file_name.as_deref(), Some("a.gif"));
        let p = params("photo", "a.png").normalize_photo();
        assert_eq!(p.file_name.as_deref(), Some("a.png"));
    }

    fn client_with(config: TelegramConfig) -> TelegramClient {
        TelegramClient::new(&config, Arc::new(AdmissionRegistry::new())).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_rejected_without_admission() {
        let registry = Arc::new(AdmissionRegistry::new());
        let client = TelegramClient::new(&TelegramConfig::default(), registry.clone()).unwrap();

        let err = client.send_file(params("photo", "a.png")).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidPayload(_)));
        assert!(client.get_file_path("x").await.is_err());
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_missing_chat_id_rejected() {
        let client = client_with(TelegramConfig {
            token: "1:abc".into(),
            ..Default::default()
        });
        let mut p = params("photo", "a.png");
        p.chat_id = " ".into();
        let err = client.send_file(p).await.unwrap_err();
        assert_eq!(err, UploadError::InvalidPayload("chatId 必填".into()));
    }

    #[tokio::test]
    async fn test_transport_error_retried_then_permit_released() {
        let registry = Arc::new(AdmissionRegistry::new());
        let config = TelegramConfig {
            token: "1:abc".into(),
            // 不可达端口，连接立即失败
            api_base: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let client = TelegramClient::new(&config, registry.clone())
            .unwrap()
            .with_retry(RetryPolicy::new(
                2,
                Duration::from_millis(1),
                Duration::from_millis(2),
            ));

        let err = client.send_file(params("photo", "a.png")).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(registry.channel(UPLOAD).in_flight(), 0);
    }

    #[test]
    fn test_urls() {
        let client = client_with(TelegramConfig {
            token: "1:abc".into(),
            ..Default::default()
        });
        assert_eq!(
            client.file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot1:abc/photos/file_1.jpg"
        );
        assert_eq!(
            client.method_url("getFile"),
            "https://api.telegram.org/bot1:abc/getFile"
        );
    }
}

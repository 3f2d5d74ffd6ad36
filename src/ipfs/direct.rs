// 内容寻址存储直传客户端

use crate::common::UploadError;
use crate::config::IpfsConfig;
use crate::ipfs::types::DirectUploadResponse;
use crate::uploader::ProgressReporter;
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 直传大小上限: 30MB
pub const MAX_DIRECT_UPLOAD_SIZE: u64 = 30 * 1024 * 1024;

/// 直传客户端
#[derive(Debug, Clone)]
pub struct DirectIpfsClient {
    client: Client,
    upload_url: String,
    max_size: u64,
}

impl DirectIpfsClient {
    pub fn new(config: &IpfsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            upload_url: config.direct_upload_url.clone(),
            max_size: config.max_direct_size.min(MAX_DIRECT_UPLOAD_SIZE),
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// 上传文件
    ///
    /// 超过上限的文件直接拒绝，不发起请求
    pub async fn upload(
        &self,
        name: &str,
        data: Arc<Vec<u8>>,
        progress: ProgressReporter,
    ) -> Result<DirectUploadResponse, UploadError> {
        let size = data.len() as u64;
        if size > self.max_size {
            return Err(UploadError::InvalidPayload(format!(
                "文件太大，请选择小于 {}MB 的文件",
                self.max_size / 1024 / 1024
            )));
        }

        debug!("直传到内容寻址存储: name={}, size={}", name, size);
        let part = Part::stream_with_length(progress.wrap_body(data), size)
            .file_name(name.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(UploadError::from_reqwest)?;
        let body: DirectUploadResponse = serde_json::from_str(&text).unwrap_or_default();

        if !status.is_success() || !body.is_success() {
            let message = body
                .message
                .clone()
                .unwrap_or_else(|| format!("上传失败，HTTP {}", status.as_u16()));
            return Err(UploadError::UpstreamRejected {
                code: Some(status.as_u16() as i64),
                message,
            });
        }

        progress.report(100);
        info!(
            "直传完成: {} -> cid={}",
            name,
            body.cid.as_deref().unwrap_or("-")
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_oversize_rejected_before_request() {
        let mut config = IpfsConfig::default();
        // 不可达地址，如果发出请求会得到 Transport 错误
        config.direct_upload_url = "http://127.0.0.1:9/upload".into();
        let client = DirectIpfsClient::new(&config).unwrap();

        let data = Arc::new(vec![0u8; MAX_DIRECT_UPLOAD_SIZE as usize + 1]);
        let err = client
            .upload("big.bin", data, ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPayload(_)));
    }

    #[test]
    fn test_configured_limit_never_exceeds_ceiling() {
        let mut config = IpfsConfig::default();
        config.max_direct_size = 100 * 1024 * 1024;
        let client = DirectIpfsClient::new(&config).unwrap();
        assert_eq!(client.max_size(), MAX_DIRECT_UPLOAD_SIZE);

        config.max_direct_size = 1024;
        let client = DirectIpfsClient::new(&config).unwrap();
        assert_eq!(client.max_size(), 1024);
    }
}

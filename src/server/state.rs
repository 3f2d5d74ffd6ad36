// 应用状态

use crate::common::AdmissionRegistry;
use crate::config::AppConfig;
use crate::ipfs::DirectIpfsClient;
use crate::telegram::TelegramClient;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
    /// 准入通道注册表
    pub admission: Arc<AdmissionRegistry>,
    /// Telegram 客户端
    pub telegram: Arc<TelegramClient>,
    /// 内容寻址存储直传客户端
    pub ipfs: Arc<DirectIpfsClient>,
    /// 网关代理与占位图使用的 HTTP 客户端
    pub proxy_client: reqwest::Client,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(config: AppConfig) -> Result<Self> {
        let admission = Arc::new(AdmissionRegistry::from_config(&config.admission));
        let telegram = TelegramClient::new(&config.telegram, admission.clone())?;
        let ipfs = DirectIpfsClient::new(&config.ipfs)?;
        let proxy_client = reqwest::Client::builder()
            .timeout(config.ipfs.request_timeout())
            .build()
            .context("Failed to create proxy client")?;

        if !telegram.has_token() {
            tracing::warn!("⚠️  未配置 Telegram Bot Token，中转上传与 /file 代理将不可用");
        }
        info!(
            "应用状态初始化完成: 防盗链={}",
            if config.hotlink.is_enabled() { "开启" } else { "关闭" }
        );

        Ok(Self {
            config: Arc::new(config),
            admission,
            telegram: Arc::new(telegram),
            ipfs: Arc::new(ipfs),
            proxy_client,
        })
    }
}

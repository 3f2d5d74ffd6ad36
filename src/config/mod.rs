// 配置管理模块

use crate::uploader::UploadDisk;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// Telegram 中转配置
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// IPFS 存储配置
    #[serde(default)]
    pub ipfs: IpfsConfig,
    /// 上传客户端配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 准入通道配置
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// 防盗链配置
    #[serde(default)]
    pub hotlink: HotlinkConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// CORS允许的源（为空时允许任意源）
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// 上传请求体大小上限（字节，默认 50MB，与 Bot API 上限一致）
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_max_body_size() -> usize {
    50 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Telegram 中转配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot Token
    #[serde(default)]
    pub token: String,
    /// 默认 chat_id（请求未携带 chatId 时使用）
    #[serde(default)]
    pub chat_id: String,
    /// Bot API 地址
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 总尝试次数（含首次）
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// 重试最小间隔（毫秒）
    #[serde(default = "default_retry_min_delay_ms")]
    pub retry_min_delay_ms: u64,
    /// 重试最大间隔（毫秒）
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_min_delay_ms() -> u64 {
    10_000
}

fn default_retry_max_delay_ms() -> u64 {
    15_000
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: String::new(),
            api_base: default_telegram_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_min_delay_ms: default_retry_min_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl TelegramConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> crate::common::RetryPolicy {
        crate::common::RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_min_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

/// IPFS 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// 直传中继地址
    #[serde(default = "default_direct_upload_url")]
    pub direct_upload_url: String,
    /// 直传大小上限（字节，默认 30MB）
    #[serde(default = "default_max_direct_size")]
    pub max_direct_size: u64,
    /// 公共网关（代理 /ipfs/crossbell/ 使用）
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// PinMe 分片上传 API 地址
    #[serde(default = "default_pinme_api_base")]
    pub pinme_api_base: String,
    /// PinMe 短链网关域名后缀
    #[serde(default = "default_pinme_gateway_suffix")]
    pub pinme_gateway_suffix: String,
    /// 请求超时（秒）
    #[serde(default = "default_ipfs_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 状态轮询最大次数
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    /// 状态轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_direct_upload_url() -> String {
    "https://ipfs-relay.crossbell.io/upload".to_string()
}

fn default_max_direct_size() -> u64 {
    30 * 1024 * 1024
}

fn default_gateway_url() -> String {
    "https://ipfs.io/ipfs".to_string()
}

fn default_pinme_api_base() -> String {
    "https://pindata.dev/api/v3".to_string()
}

fn default_pinme_gateway_suffix() -> String {
    "pinit.eth.limo".to_string()
}

fn default_ipfs_timeout_secs() -> u64 {
    30
}

fn default_poll_max_attempts() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            direct_upload_url: default_direct_upload_url(),
            max_direct_size: default_max_direct_size(),
            gateway_url: default_gateway_url(),
            pinme_api_base: default_pinme_api_base(),
            pinme_gateway_suffix: default_pinme_gateway_suffix(),
            request_timeout_secs: default_ipfs_timeout_secs(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl IpfsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_config(&self) -> crate::ipfs::PollConfig {
        crate::ipfs::PollConfig {
            max_attempts: self.poll_max_attempts,
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// 上传客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 网关地址（中转上传经由网关转发）
    #[serde(default = "default_gateway")]
    pub gateway_url: String,
    /// 最大同时上传文件数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 默认存储盘
    #[serde(default)]
    pub disk: UploadDisk,
    /// 附加表单字段（原样追加到中转请求）
    #[serde(default)]
    pub extra_form_data: HashMap<String, String>,
    /// 客户端请求超时（秒）
    #[serde(default = "default_client_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_client_timeout_secs() -> u64 {
    120
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway(),
            concurrency: default_concurrency(),
            disk: UploadDisk::default(),
            extra_form_data: HashMap::new(),
            request_timeout_secs: default_client_timeout_secs(),
        }
    }
}

/// 单个准入通道的上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLimits {
    /// 最大并发
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 最大等待队列长度
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
}

fn default_max_concurrent() -> usize {
    crate::common::admission::DEFAULT_MAX_CONCURRENT
}

fn default_max_queue() -> usize {
    crate::common::admission::DEFAULT_MAX_QUEUE
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue: default_max_queue(),
        }
    }
}

/// 准入通道配置（三个出站依赖各自独立）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// 远程元数据查询
    #[serde(default)]
    pub remote_fetch: ChannelLimits,
    /// 文件代理下载
    #[serde(default)]
    pub file_download: ChannelLimits,
    /// 中转上传
    #[serde(default)]
    pub upload: ChannelLimits,
}

/// 防盗链配置
///
/// 两个白名单都为空时不做任何检查
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotlinkConfig {
    /// 允许的 Host
    #[serde(default)]
    pub allow_hosts: Vec<String>,
    /// 允许的 Referer 域名
    #[serde(default)]
    pub allow_referers: Vec<String>,
    /// 拒绝访问时返回的占位图
    #[serde(default = "default_placeholder_url")]
    pub placeholder_url: String,
}

fn default_placeholder_url() -> String {
    "https://36f02096.pinit.eth.limo".to_string()
}

impl Default for HotlinkConfig {
    fn default() -> Self {
        Self {
            allow_hosts: Vec::new(),
            allow_referers: Vec::new(),
            placeholder_url: default_placeholder_url(),
        }
    }
}

impl HotlinkConfig {
    pub fn is_enabled(&self) -> bool {
        !self.allow_hosts.is_empty() || !self.allow_referers.is_empty()
    }
}

/// 解析逗号分隔列表（去空白、去空项）
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置，之后应用环境变量覆盖
    pub async fn load_or_default(path: &str) -> Self {
        let mut config = match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 尝试保存默认配置
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// 使用环境变量覆盖敏感或部署相关的字段
    ///
    /// - FILEBED_TG_TOKEN / FILEBED_TG_CHAT_ID
    /// - FILEBED_ALLOW_HOSTS / FILEBED_ALLOW_REFERERS（逗号分隔）
    /// - FILEBED_HOST / FILEBED_PORT
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("FILEBED_TG_TOKEN") {
            self.telegram.token = token.trim().to_string();
        }
        if let Some(chat_id) = lookup("FILEBED_TG_CHAT_ID") {
            self.telegram.chat_id = chat_id.trim().to_string();
        }
        if let Some(hosts) = lookup("FILEBED_ALLOW_HOSTS") {
            self.hotlink.allow_hosts = parse_list(&hosts);
        }
        if let Some(referers) = lookup("FILEBED_ALLOW_REFERERS") {
            self.hotlink.allow_referers = parse_list(&referers);
        }
        if let Some(host) = lookup("FILEBED_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("FILEBED_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("忽略无效端口 FILEBED_PORT={}", port),
            }
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.upload.concurrency == 0 {
            anyhow::bail!("upload.concurrency 必须大于 0");
        }
        for (name, limits) in [
            ("remote_fetch", &self.admission.remote_fetch),
            ("file_download", &self.admission.file_download),
            ("upload", &self.admission.upload),
        ] {
            if limits.max_concurrent == 0 {
                anyhow::bail!("admission.{}.max_concurrent 必须大于 0", name);
            }
        }
        if self.telegram.retry_attempts == 0 {
            anyhow::bail!("telegram.retry_attempts 必须大于 0");
        }
        if self.telegram.retry_min_delay_ms > self.telegram.retry_max_delay_ms {
            anyhow::bail!(
                "telegram 重试间隔无效: min={}ms > max={}ms",
                self.telegram.retry_min_delay_ms,
                self.telegram.retry_max_delay_ms
            );
        }
        if self.ipfs.poll_max_attempts == 0 {
            anyhow::bail!("ipfs.poll_max_attempts 必须大于 0");
        }
        Ok(())
    }
}

// filebed-rust
// 文件床网关与上传队列核心库

// 🔥 公共模块（错误类型、重试、准入通道）
pub mod common;

// 配置管理模块
pub mod config;

// 日志系统
pub mod logging;

// Web服务器模块
pub mod server;

// Telegram 中转后端
pub mod telegram;

// 内容寻址存储（直传 / 分片）
pub mod ipfs;

// 上传队列模块
pub mod uploader;

// 导出常用类型
pub use common::{AdmissionRegistry, RetryPolicy, UploadError};
pub use config::AppConfig;
pub use server::AppState;
pub use uploader::{
    UploadBatch, UploadDisk, UploadPayload, UploadQueue, UploadResult, UploadTask,
    UploadTaskStatus,
};

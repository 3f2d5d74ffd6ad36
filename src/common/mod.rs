//! 公共模块
//!
//! 提供跨模块使用的通用组件：错误类型、重试策略、命名准入通道

pub mod admission;
pub mod error;
pub mod retry;

pub use admission::{
    AdmissionChannel, AdmissionPermit, AdmissionRegistry, ChannelStats, FILE_DOWNLOAD,
    REMOTE_FETCH, UPLOAD,
};
pub use error::{Retriable, UploadError, UploadErrorKind};
pub use retry::RetryPolicy;

// 上传任务定义
//
// 每个任务持有自己的 TaskCell，队列清空后仍在进行中的上传写入的是一个
// 已不被引用的单元，不会影响可见任务列表

use crate::common::{UploadError, UploadErrorKind};
use crate::uploader::transport::UploadDisk;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// 进度上报的帧大小: 64KB
pub const PROGRESS_FRAME_SIZE: usize = 64 * 1024;

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadTaskStatus {
    /// 等待中
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Done,
    /// 失败
    Error,
}

/// 载荷类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    File,
    Url,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::File => write!(f, "file"),
            PayloadKind::Url => write!(f, "url"),
        }
    }
}

/// 待上传内容
#[derive(Clone)]
pub enum UploadPayload {
    /// 本地字节
    Bytes {
        name: String,
        mime: Option<String>,
        data: Arc<Vec<u8>>,
    },
    /// 远程地址（由中转后端自行拉取）
    Url(String),
}

impl fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPayload::Bytes { name, mime, data } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("mime", mime)
                .field("len", &data.len())
                .finish(),
            UploadPayload::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

impl UploadPayload {
    pub fn bytes(name: impl Into<String>, mime: Option<String>, data: Vec<u8>) -> Self {
        UploadPayload::Bytes {
            name: name.into(),
            mime,
            data: Arc::new(data),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        UploadPayload::Url(url.into())
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            UploadPayload::Bytes { .. } => PayloadKind::File,
            UploadPayload::Url(_) => PayloadKind::Url,
        }
    }

    /// 显示用文件名（URL 取最后一段路径，去掉查询串）
    pub fn name(&self) -> String {
        match self {
            UploadPayload::Bytes { name, .. } => name.clone(),
            UploadPayload::Url(url) => url_file_name(url),
        }
    }

    /// 字节大小（URL 载荷为 0）
    pub fn size(&self) -> u64 {
        match self {
            UploadPayload::Bytes { data, .. } => data.len() as u64,
            UploadPayload::Url(_) => 0,
        }
    }
}

/// 从 URL 中提取文件名
pub fn url_file_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
        .to_string()
}

/// 预览引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Preview {
    /// 本地文件（尚未上传）
    Local(String),
    /// 远程地址；上传完成后替换为网关路径
    Remote(String),
}

/// 上传结果（与存储后端无关）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResult {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_url: Option<String>,
}

impl UploadResult {
    /// 网关上的访问路径
    pub fn preview_path(&self) -> String {
        if let Some(short) = &self.short_url {
            format!("ipfs/pinme/{}", short)
        } else if let Some(cid) = &self.cid {
            format!("ipfs/crossbell/{}", cid)
        } else {
            format!("file/{}", self.file_id)
        }
    }
}

/// 上传任务
#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    /// 任务ID
    pub id: String,
    /// 上传内容
    #[serde(skip)]
    pub payload: UploadPayload,
    /// 显示用文件名
    pub name: String,
    /// 载荷类型
    pub kind: PayloadKind,
    /// 存储盘（加入队列时确定，重试沿用）
    pub disk: UploadDisk,
    /// 任务状态
    pub status: UploadTaskStatus,
    /// 进度 0..=100
    pub progress: u8,
    /// 上传结果
    pub result: Option<UploadResult>,
    /// 错误信息
    pub error: Option<String>,
    /// 错误类别
    pub error_kind: Option<UploadErrorKind>,
    /// 预览引用
    pub preview: Preview,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
}

impl UploadTask {
    /// 创建新的上传任务
    pub fn new(payload: UploadPayload, disk: UploadDisk) -> Self {
        let preview = match &payload {
            UploadPayload::Bytes { name, .. } => Preview::Local(name.clone()),
            UploadPayload::Url(url) => Preview::Remote(url.clone()),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            name: payload.name(),
            kind: payload.kind(),
            payload,
            disk,
            status: UploadTaskStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            error_kind: None,
            preview,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    fn reject_transition(&self, to: UploadTaskStatus) -> bool {
        warn!(
            "任务 {} 非法状态转换: {:?} -> {:?}，已忽略",
            self.id, self.status, to
        );
        false
    }

    /// Pending -> Uploading
    pub fn mark_uploading(&mut self) -> bool {
        if self.status != UploadTaskStatus::Pending {
            return self.reject_transition(UploadTaskStatus::Uploading);
        }
        self.status = UploadTaskStatus::Uploading;
        self.progress = 0;
        self.started_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// Uploading -> Done
    pub fn mark_done(&mut self, result: UploadResult) -> bool {
        if self.status != UploadTaskStatus::Uploading {
            return self.reject_transition(UploadTaskStatus::Done);
        }
        self.status = UploadTaskStatus::Done;
        self.progress = 100;
        self.preview = Preview::Remote(result.preview_path());
        self.result = Some(result);
        self.error = None;
        self.error_kind = None;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// Uploading -> Error（未开始传输就失败的任务允许 Pending -> Error）
    pub fn mark_failed(&mut self, error: &UploadError) -> bool {
        if !matches!(
            self.status,
            UploadTaskStatus::Uploading | UploadTaskStatus::Pending
        ) {
            return self.reject_transition(UploadTaskStatus::Error);
        }
        self.status = UploadTaskStatus::Error;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
        self.completed_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// Error -> Pending，进度归零
    pub fn reset_for_retry(&mut self) -> bool {
        if self.status != UploadTaskStatus::Error {
            return self.reject_transition(UploadTaskStatus::Pending);
        }
        self.status = UploadTaskStatus::Pending;
        self.progress = 0;
        self.error = None;
        self.error_kind = None;
        self.started_at = None;
        self.completed_at = None;
        true
    }

    /// 更新进度（只增不减，超过 100 按 100 处理）
    pub fn update_progress(&mut self, progress: u8) {
        if self.status != UploadTaskStatus::Uploading {
            return;
        }
        let progress = progress.min(100);
        if progress > self.progress {
            self.progress = progress;
        }
    }
}

/// 任务单元
pub type TaskCell = Arc<Mutex<UploadTask>>;

/// 计算整数百分比（四舍五入，total 为 0 时返回 0）
pub fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let loaded = loaded.min(total) as u128;
    let total = total as u128;
    ((loaded * 100 + total / 2) / total) as u8
}

/// 进度上报句柄
///
/// 不绑定任务时上报会被丢弃（网关直接转发时使用）
#[derive(Clone, Default)]
pub struct ProgressReporter {
    cell: Option<TaskCell>,
}

impl ProgressReporter {
    pub fn new(cell: TaskCell) -> Self {
        Self { cell: Some(cell) }
    }

    pub fn noop() -> Self {
        Self { cell: None }
    }

    pub fn report(&self, progress: u8) {
        if let Some(cell) = &self.cell {
            cell.lock().update_progress(progress);
        }
    }

    pub fn report_bytes(&self, loaded: u64, total: u64) {
        self.report(percent(loaded, total));
    }

    /// 把字节包装成按 64KB 分帧发送的请求体，每发出一帧上报一次进度
    pub fn wrap_body(&self, data: Arc<Vec<u8>>) -> reqwest::Body {
        let total = data.len();
        let reporter = self.clone();
        let frames = (0..total).step_by(PROGRESS_FRAME_SIZE).map(move |start| {
            let end = (start + PROGRESS_FRAME_SIZE).min(total);
            let frame = data[start..end].to_vec();
            reporter.report_bytes(end as u64, total as u64);
            Ok::<_, std::io::Error>(frame)
        });
        reqwest::Body::wrap_stream(futures::stream::iter(frames))
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("bound", &self.cell.is_some())
            .finish()
    }
}

// 上传模块
//
// - task: 任务状态机与进度
// - transport: 存储盘分发与 HTTP 传输实现
// - queue: 有界并发上传队列

pub mod queue;
pub mod task;
pub mod transport;

pub use queue::{
    BatchReport, QueueOptions, TaskOutcome, UploadBatch, UploadQueue, UploadStats,
    UploadedCallback, DEFAULT_CONCURRENCY,
};
pub use task::{
    percent, PayloadKind, Preview, ProgressReporter, TaskCell, UploadPayload, UploadResult,
    UploadTask, UploadTaskStatus,
};
pub use transport::{dispatch, HttpTransport, UploadDisk, UploadTransport};

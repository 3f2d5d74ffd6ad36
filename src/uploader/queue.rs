// 上传队列
//
// 有界并发的 FIFO 队列：
// - 每个任务一个作业，按加入顺序启动
// - 同时运行的作业数不超过 concurrency
// - 作业失败只记录在任务上，不会影响队列继续运行
// - 每次 add_files / retry_failed 返回一个批次句柄，批次内作业全部结束后结算

use crate::common::UploadError;
use crate::uploader::task::{
    ProgressReporter, TaskCell, UploadPayload, UploadResult, UploadTask, UploadTaskStatus,
};
use crate::uploader::transport::{dispatch, UploadDisk, UploadTransport};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// 默认最大同时上传文件数
pub const DEFAULT_CONCURRENCY: usize = 3;

/// 批次结算回调，参数为当前可见列表中全部已完成任务的结果
pub type UploadedCallback = Arc<dyn Fn(Vec<UploadResult>) + Send + Sync>;

/// 队列选项
#[derive(Clone)]
pub struct QueueOptions {
    pub concurrency: usize,
    pub disk: UploadDisk,
    pub on_uploaded: Option<UploadedCallback>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            disk: UploadDisk::default(),
            on_uploaded: None,
        }
    }
}

/// 单个作业的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done(UploadResult),
    Failed(UploadError),
    /// 作业在启动前被 clear_all 丢弃
    Discarded,
}

/// 批次结算报告
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// 批次内每个任务的结果（按加入顺序）
    pub outcomes: Vec<(String, TaskOutcome)>,
    /// 结算时可见列表中全部已完成任务的结果
    pub uploaded: Vec<UploadResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Done(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed(_)))
    }

    pub fn discarded(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Discarded))
    }

    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// 批次句柄
///
/// 结算由后台任务完成，即使不调用 wait 回调也会触发
#[derive(Debug)]
pub struct UploadBatch {
    task_ids: Vec<String>,
    report_rx: oneshot::Receiver<BatchReport>,
}

impl UploadBatch {
    pub fn task_ids(&self) -> &[String] {
        &self.task_ids
    }

    /// 等待批次内所有作业结束
    pub async fn wait(self) -> BatchReport {
        let task_ids = self.task_ids;
        match self.report_rx.await {
            Ok(report) => report,
            Err(_) => BatchReport {
                outcomes: task_ids
                    .into_iter()
                    .map(|id| (id, TaskOutcome::Discarded))
                    .collect(),
                uploaded: Vec::new(),
            },
        }
    }
}

/// 队列统计
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct UploadStats {
    /// 等待中 + 上传中
    pub pending: usize,
    pub success: usize,
    pub error: usize,
    pub total: usize,
}

struct Job {
    task: TaskCell,
    disk: UploadDisk,
    done_tx: oneshot::Sender<TaskOutcome>,
}

struct QueueState {
    /// 可见任务（按加入顺序）
    tasks: Vec<TaskCell>,
    /// 尚未启动的作业
    jobs: VecDeque<Job>,
    active: usize,
    peak_active: usize,
    concurrency: usize,
    disk: UploadDisk,
}

/// 上传队列
pub struct UploadQueue {
    transport: Arc<dyn UploadTransport>,
    state: Mutex<QueueState>,
    on_uploaded: Option<UploadedCallback>,
}

impl UploadQueue {
    pub fn new(transport: Arc<dyn UploadTransport>, options: QueueOptions) -> Arc<Self> {
        Arc::new(Self {
            transport,
            state: Mutex::new(QueueState {
                tasks: Vec::new(),
                jobs: VecDeque::new(),
                active: 0,
                peak_active: 0,
                concurrency: options.concurrency.max(1),
                disk: options.disk,
            }),
            on_uploaded: options.on_uploaded,
        })
    }

    /// 添加待上传内容，立即返回批次句柄
    pub fn add_files(self: &Arc<Self>, items: Vec<UploadPayload>) -> UploadBatch {
        let mut receivers = Vec::with_capacity(items.len());
        {
            let mut state = self.state.lock();
            let disk = state.disk;
            for payload in items {
                let task = UploadTask::new(payload, disk);
                let id = task.id.clone();
                let cell: TaskCell = Arc::new(Mutex::new(task));
                let (done_tx, done_rx) = oneshot::channel();

                state.tasks.push(cell.clone());
                state.jobs.push_back(Job {
                    task: cell,
                    disk,
                    done_tx,
                });
                receivers.push((id, done_rx));
            }
            info!(
                "加入 {} 个上传任务: disk={}, 队列中={}",
                receivers.len(),
                disk,
                state.jobs.len()
            );
        }

        self.drain();
        self.settle(receivers)
    }

    /// 重新排队所有失败任务
    pub fn retry_failed(self: &Arc<Self>) -> UploadBatch {
        let mut receivers = Vec::new();
        {
            let mut state = self.state.lock();
            let mut retried = Vec::new();
            for cell in &state.tasks {
                let mut task = cell.lock();
                if task.status == UploadTaskStatus::Error && task.reset_for_retry() {
                    let (done_tx, done_rx) = oneshot::channel();
                    receivers.push((task.id.clone(), done_rx));
                    retried.push(Job {
                        task: cell.clone(),
                        disk: task.disk,
                        done_tx,
                    });
                }
            }
            info!("重试 {} 个失败任务", retried.len());
            state.jobs.extend(retried);
        }

        self.drain();
        self.settle(receivers)
    }

    /// 调整并发上限（至少为 1），提高时立即启动更多作业
    pub fn set_concurrency(self: &Arc<Self>, concurrency: usize) {
        {
            let mut state = self.state.lock();
            state.concurrency = concurrency.max(1);
            info!("上传并发数调整为 {}", state.concurrency);
        }
        self.drain();
    }

    pub fn concurrency(&self) -> usize {
        self.state.lock().concurrency
    }

    /// 后续加入的任务使用的存储盘
    pub fn set_disk(&self, disk: UploadDisk) {
        self.state.lock().disk = disk;
    }

    pub fn disk(&self) -> UploadDisk {
        self.state.lock().disk
    }

    /// 清空任务列表和未启动的作业
    ///
    /// 正在上传的作业无法取消，会继续写入各自的任务单元
    pub fn clear_all(&self) {
        let dropped: Vec<Job> = {
            let mut state = self.state.lock();
            state.tasks.clear();
            state.jobs.drain(..).collect()
        };
        info!("清空上传队列，丢弃 {} 个未启动的作业", dropped.len());
        // done_tx 随作业一起释放，对应批次得到 Discarded
        drop(dropped);
    }

    /// 移除已完成的任务（只影响可见列表）
    pub fn clear_success(&self) {
        let mut state = self.state.lock();
        state
            .tasks
            .retain(|cell| cell.lock().status != UploadTaskStatus::Done);
    }

    pub fn stats(&self) -> UploadStats {
        let state = self.state.lock();
        let mut stats = UploadStats {
            total: state.tasks.len(),
            ..Default::default()
        };
        for cell in &state.tasks {
            match cell.lock().status {
                UploadTaskStatus::Pending | UploadTaskStatus::Uploading => stats.pending += 1,
                UploadTaskStatus::Done => stats.success += 1,
                UploadTaskStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    /// 可见任务快照（按加入顺序）
    pub fn tasks(&self) -> Vec<UploadTask> {
        let state = self.state.lock();
        state.tasks.iter().map(|cell| cell.lock().clone()).collect()
    }

    /// 当前运行中的作业数
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// 同时运行作业数的历史最大值
    pub fn peak_active(&self) -> usize {
        self.state.lock().peak_active
    }

    fn uploaded_results(&self) -> Vec<UploadResult> {
        let state = self.state.lock();
        state
            .tasks
            .iter()
            .filter_map(|cell| {
                let task = cell.lock();
                match task.status {
                    UploadTaskStatus::Done => task.result.clone(),
                    _ => None,
                }
            })
            .collect()
    }

    /// 有空闲名额时按 FIFO 启动作业
    fn drain(self: &Arc<Self>) {
        let mut state = self.state.lock();
        while state.active < state.concurrency {
            let Some(job) = state.jobs.pop_front() else {
                break;
            };
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);

            let slot = ActiveSlot {
                queue: Arc::clone(self),
            };
            tokio::spawn(async move {
                let Job {
                    task,
                    disk,
                    done_tx,
                } = job;
                let outcome = slot.queue.run(task, disk).await;
                // 先归还名额再通知批次，批次结算时 active 已经反映最新状态
                drop(slot);
                let _ = done_tx.send(outcome);
            });
        }
    }

    async fn run(&self, cell: TaskCell, disk: UploadDisk) -> TaskOutcome {
        let (id, payload) = {
            let mut task = cell.lock();
            if !task.mark_uploading() {
                return TaskOutcome::Discarded;
            }
            (task.id.clone(), task.payload.clone())
        };
        debug!("开始上传任务 {}: disk={}", id, disk);

        let progress = ProgressReporter::new(cell.clone());
        match dispatch(self.transport.as_ref(), disk, &payload, progress).await {
            Ok(result) => {
                cell.lock().mark_done(result.clone());
                info!("任务 {} 上传完成: {}", id, result.file_id);
                TaskOutcome::Done(result)
            }
            Err(e) => {
                cell.lock().mark_failed(&e);
                warn!("任务 {} 上传失败: {}", id, e);
                TaskOutcome::Failed(e)
            }
        }
    }

    /// 后台等待批次内所有作业结束，然后触发回调并发出报告
    fn settle(
        self: &Arc<Self>,
        receivers: Vec<(String, oneshot::Receiver<TaskOutcome>)>,
    ) -> UploadBatch {
        let task_ids: Vec<String> = receivers.iter().map(|(id, _)| id.clone()).collect();
        let (report_tx, report_rx) = oneshot::channel();
        let queue = Arc::clone(self);

        tokio::spawn(async move {
            let (ids, rxs): (Vec<_>, Vec<_>) = receivers.into_iter().unzip();
            let outcomes = join_all(rxs)
                .await
                .into_iter()
                .map(|r| r.unwrap_or(TaskOutcome::Discarded));
            let outcomes: Vec<(String, TaskOutcome)> = ids.into_iter().zip(outcomes).collect();

            let uploaded = queue.uploaded_results();
            if let Some(callback) = &queue.on_uploaded {
                callback(uploaded.clone());
            }

            let _ = report_tx.send(BatchReport { outcomes, uploaded });
        });

        UploadBatch {
            task_ids,
            report_rx,
        }
    }
}

/// 运行名额（RAII）
///
/// 作业结束或 panic 时归还名额并继续调度
struct ActiveSlot {
    queue: Arc<UploadQueue>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.queue.drain();
    }
}

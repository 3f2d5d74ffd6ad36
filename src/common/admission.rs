//! 命名准入通道
//!
//! 每个下游依赖一个通道，限制同时进行中的请求数：
//! - 未满并发上限时立即放行
//! - 已满时进入 FIFO 等待队列
//! - 等待队列也满时立即失败（TooManyPending），不会无限阻塞
//!
//! 通道状态的读写全部在同一把锁内完成，保证 in_flight 永不超过上限

use crate::common::error::UploadError;
use crate::config::{AdmissionConfig, ChannelLimits};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// 远程元数据查询通道（如 getFile）
pub const REMOTE_FETCH: &str = "remote-fetch";

/// 大文件代理下载通道
pub const FILE_DOWNLOAD: &str = "file-download";

/// 中转后端上传通道
pub const UPLOAD: &str = "upload";

/// 默认最大并发
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// 默认最大等待队列长度
pub const DEFAULT_MAX_QUEUE: usize = 100;

#[derive(Debug)]
struct ChannelState {
    max_concurrent: usize,
    max_queue: usize,
    in_flight: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl ChannelState {
    /// 清理已放弃等待的请求
    fn prune_waiters(&mut self) {
        self.waiters.retain(|tx| !tx.is_closed());
    }
}

/// 通道状态快照
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelStats {
    pub name: String,
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub in_flight: usize,
    pub waiting: usize,
}

/// 准入通道
#[derive(Debug)]
pub struct AdmissionChannel {
    name: String,
    state: Mutex<ChannelState>,
}

impl AdmissionChannel {
    /// 创建通道，`max_concurrent` 至少为 1
    pub fn new(name: impl Into<String>, max_concurrent: usize, max_queue: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(ChannelState {
                max_concurrent: max_concurrent.max(1),
                max_queue,
                in_flight: 0,
                waiters: VecDeque::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前进行中的请求数
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// 当前等待中的请求数
    pub fn waiting(&self) -> usize {
        let mut state = self.state.lock();
        state.prune_waiters();
        state.waiters.len()
    }

    pub fn stats(&self) -> ChannelStats {
        let mut state = self.state.lock();
        state.prune_waiters();
        ChannelStats {
            name: self.name.clone(),
            max_concurrent: state.max_concurrent,
            max_queue: state.max_queue,
            in_flight: state.in_flight,
            waiting: state.waiters.len(),
        }
    }

    /// 运行时调整上限
    ///
    /// 提高并发上限时立即放行等待中的请求；降低时不影响已放行的请求
    pub fn configure(&self, max_concurrent: Option<usize>, max_queue: Option<usize>) {
        let mut state = self.state.lock();
        if let Some(n) = max_concurrent {
            state.max_concurrent = n.max(1);
        }
        if let Some(n) = max_queue {
            state.max_queue = n;
        }

        while state.in_flight < state.max_concurrent {
            match state.waiters.pop_front() {
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        state.in_flight += 1;
                    }
                }
                None => break,
            }
        }

        info!(
            "准入通道 {} 配置更新: max_concurrent={}, max_queue={}",
            self.name, state.max_concurrent, state.max_queue
        );
    }

    /// 获取一个执行名额
    ///
    /// 返回的 permit 被 drop 时自动归还名额
    pub async fn acquire(self: &Arc<Self>) -> Result<AdmissionPermit, UploadError> {
        let rx = {
            let mut state = self.state.lock();
            if state.in_flight < state.max_concurrent {
                state.in_flight += 1;
                return Ok(AdmissionPermit {
                    channel: Arc::clone(self),
                });
            }

            state.prune_waiters();
            if state.waiters.len() >= state.max_queue {
                warn!(
                    "准入通道 {} 等待队列已满: in_flight={}, waiting={}",
                    self.name,
                    state.in_flight,
                    state.waiters.len()
                );
                return Err(UploadError::TooManyPending {
                    channel: self.name.clone(),
                });
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(
                "准入通道 {} 进入等待: 队列位置={}",
                self.name,
                state.waiters.len()
            );
            rx
        };

        let waiter = Waiter {
            rx: Some(rx),
            channel: Arc::clone(self),
        };
        waiter.granted().await?;

        Ok(AdmissionPermit {
            channel: Arc::clone(self),
        })
    }

    /// 归还一个名额
    ///
    /// 有等待者时把名额直接转交给最早的等待者（in_flight 不变）
    fn release_slot(&self) {
        let mut state = self.state.lock();

        // 调低上限后先消化超出部分
        if state.in_flight > state.max_concurrent {
            state.in_flight -= 1;
            return;
        }

        while let Some(tx) = state.waiters.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

/// 等待中的准入请求
///
/// 调用方在等待期间被取消时，如果名额已经转交过来，需要归还
struct Waiter {
    rx: Option<oneshot::Receiver<()>>,
    channel: Arc<AdmissionChannel>,
}

impl Waiter {
    async fn granted(mut self) -> Result<(), UploadError> {
        let result = match self.rx.as_mut() {
            Some(rx) => rx.await,
            None => return Ok(()),
        };
        self.rx = None;
        result.map_err(|_| UploadError::Transport(format!("准入通道 {} 已关闭", self.channel.name)))
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                debug!("准入通道 {} 等待者已取消，归还已转交的名额", self.channel.name);
                self.channel.release_slot();
            }
        }
    }
}

/// 执行名额（RAII）
///
/// drop 时归还名额，错误路径同样生效
#[derive(Debug)]
pub struct AdmissionPermit {
    channel: Arc<AdmissionChannel>,
}

impl AdmissionPermit {
    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// 显式归还
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.channel.release_slot();
    }
}

/// 准入通道注册表
///
/// 由进程入口创建，以 Arc 传递给所有需要准入控制的组件。
/// 通道按名称懒创建，进程存活期间不销毁
#[derive(Debug)]
pub struct AdmissionRegistry {
    channels: DashMap<String, Arc<AdmissionChannel>>,
    default_limits: ChannelLimits,
}

impl AdmissionRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            default_limits: ChannelLimits::default(),
        }
    }

    /// 按配置预置三个出站通道
    pub fn from_config(config: &AdmissionConfig) -> Self {
        let registry = Self::new();
        for (name, limits) in [
            (REMOTE_FETCH, &config.remote_fetch),
            (FILE_DOWNLOAD, &config.file_download),
            (UPLOAD, &config.upload),
        ] {
            registry.channels.insert(
                name.to_string(),
                AdmissionChannel::new(name, limits.max_concurrent, limits.max_queue),
            );
            info!(
                "准入通道 {}: max_concurrent={}, max_queue={}",
                name, limits.max_concurrent, limits.max_queue
            );
        }
        registry
    }

    /// 获取通道（不存在时按默认上限创建）
    pub fn channel(&self, name: &str) -> Arc<AdmissionChannel> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| {
                AdmissionChannel::new(
                    name,
                    self.default_limits.max_concurrent,
                    self.default_limits.max_queue,
                )
            })
            .value()
            .clone()
    }

    /// 调整某个通道的上限
    pub fn configure(&self, name: &str, max_concurrent: Option<usize>, max_queue: Option<usize>) {
        self.channel(name).configure(max_concurrent, max_queue);
    }

    pub async fn acquire(&self, name: &str) -> Result<AdmissionPermit, UploadError> {
        self.channel(name).acquire().await
    }

    /// 在准入控制下执行操作
    ///
    /// 获取名额 -> 执行 -> 归还名额（无论成功失败）
    pub async fn with_admission<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<UploadError>,
    {
        let _permit = self.acquire(name).await?;
        operation().await
    }

    /// 所有通道的状态快照（按名称排序）
    pub fn snapshot(&self) -> Vec<ChannelStats> {
        let mut stats: Vec<ChannelStats> = self
            .channels
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

impl Default for AdmissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_until_waiting(channel: &Arc<AdmissionChannel>, expected: usize) {
        for _ in 0..1000 {
            if channel.waiting() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("等待者数量未达到 {}", expected);
    }

    #[tokio::test]
    async fn test_immediate_admission_under_limit() {
        let channel = AdmissionChannel::new("test", 2, 10);
        let p1 = channel.acquire().await.unwrap();
        let p2 = channel.acquire().await.unwrap();
        assert_eq!(channel.in_flight(), 2);
        assert_eq!(channel.waiting(), 0);

        drop(p1);
        assert_eq!(channel.in_flight(), 1);
        p2.release();
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_one_extra_caller_waits_and_fifo_grant() {
        let channel = AdmissionChannel::new("fifo", 1, 10);
        let first = channel.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3 {
            let ch = channel.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let permit = ch.acquire().await.unwrap();
                order.lock().push(id);
                tokio::time::sleep(Duration::from_millis(2)).await;
                drop(permit);
            }));
            // 保证按 0,1,2 的顺序入队
            wait_until_waiting(&channel, id + 1).await;
        }

        assert_eq!(channel.in_flight(), 1);
        assert_eq!(channel.waiting(), 3);

        drop(first);
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_queue_full_fails_fast() {
        let channel = AdmissionChannel::new("full", 1, 2);
        let _held = channel.acquire().await.unwrap();

        let c1 = channel.clone();
        let w1 = tokio::spawn(async move { c1.acquire().await.map(drop) });
        wait_until_waiting(&channel, 1).await;
        let c2 = channel.clone();
        let w2 = tokio::spawn(async move { c2.acquire().await.map(drop) });
        wait_until_waiting(&channel, 2).await;

        let err = channel.acquire().await.unwrap_err();
        assert_eq!(
            err,
            UploadError::TooManyPending {
                channel: "full".into()
            }
        );
        // 被拒绝的请求不占用名额
        assert_eq!(channel.in_flight(), 1);
        assert_eq!(channel.waiting(), 2);

        drop(_held);
        assert!(w1.await.unwrap().is_ok());
        assert!(w2.await.unwrap().is_ok());
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_queue_second_call_rejected() {
        let registry = AdmissionRegistry::new();
        registry.configure("solo", Some(1), Some(0));

        let (tx, rx) = oneshot::channel::<()>();
        let reg = Arc::new(registry);
        let r1 = reg.clone();
        let first = tokio::spawn(async move {
            r1.with_admission("solo", || async move {
                let _ = rx.await;
                Ok::<_, UploadError>(1)
            })
            .await
        });

        // 等待第一个调用拿到名额
        for _ in 0..1000 {
            if reg.channel("solo").in_flight() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = reg
            .with_admission("solo", || async { Ok::<_, UploadError>(2) })
            .await;
        assert!(matches!(second, Err(UploadError::TooManyPending { .. })));

        tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Ok(1));
        assert_eq!(reg.channel("solo").in_flight(), 0);
    }

    #[tokio::test]
    async fn test_release_on_error_path() {
        let registry = AdmissionRegistry::new();
        let result: Result<(), UploadError> = registry
            .with_admission(UPLOAD, || async {
                Err(UploadError::Transport("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(registry.channel(UPLOAD).in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak() {
        let channel = AdmissionChannel::new("cancel", 1, 5);
        let held = channel.acquire().await.unwrap();

        let ch = channel.clone();
        let waiter = tokio::spawn(async move {
            let _p = ch.acquire().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        wait_until_waiting(&channel, 1).await;
        waiter.abort();
        let _ = waiter.await;

        assert_eq!(channel.waiting(), 0);
        drop(held);
        assert_eq!(channel.in_flight(), 0);

        // 名额可以再次立即获取
        let again = channel.acquire().await.unwrap();
        assert_eq!(channel.in_flight(), 1);
        drop(again);
    }

    #[tokio::test]
    async fn test_configure_raises_limit_admits_waiters() {
        let channel = AdmissionChannel::new("grow", 1, 5);
        let _held = channel.acquire().await.unwrap();

        let ch = channel.clone();
        let waiter = tokio::spawn(async move { ch.acquire().await.map(|p| p.release()) });
        wait_until_waiting(&channel, 1).await;

        channel.configure(Some(2), None);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(channel.in_flight(), 1);
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = AdmissionConfig::default();
        config.upload.max_concurrent = 2;
        config.upload.max_queue = 7;

        let registry = AdmissionRegistry::from_config(&config);
        let snapshot = registry.snapshot();
        let names: Vec<&str> = snapshot.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![FILE_DOWNLOAD, REMOTE_FETCH, UPLOAD]);

        let upload = snapshot.iter().find(|s| s.name == UPLOAD).unwrap();
        assert_eq!(upload.max_concurrent, 2);
        assert_eq!(upload.max_queue, 7);

        let fetch = snapshot.iter().find(|s| s.name == REMOTE_FETCH).unwrap();
        assert_eq!(fetch.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(fetch.max_queue, DEFAULT_MAX_QUEUE);
    }
}

// 分片上传会话
//
// 流程: init -> upload_chunk × N -> complete -> 轮询 up_status 直到就绪
// 同一次上传的所有请求使用同一个 uid

use crate::common::UploadError;
use crate::config::IpfsConfig;
use crate::ipfs::types::{
    ApiEnvelope, ChunkCompleteData, ChunkCompleteRequest, ChunkInitData, ChunkInitRequest,
    ChunkUploadData, PinMeUploadResult, UploadStatusData,
};
use crate::uploader::ProgressReporter;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 状态轮询配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// 最大轮询次数（失败的轮询同样计数）
    pub max_attempts: u32,
    /// 轮询间隔
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

/// 分片上传远程接口
#[async_trait]
pub trait ChunkedUploadApi: Send + Sync {
    async fn init(&self, request: &ChunkInitRequest) -> Result<ChunkInitData, UploadError>;

    async fn upload_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
        uid: &str,
        chunk: Vec<u8>,
    ) -> Result<ChunkUploadData, UploadError>;

    async fn complete(&self, session_id: &str, uid: &str) -> Result<ChunkCompleteData, UploadError>;

    async fn status(&self, trace_id: &str, uid: &str) -> Result<UploadStatusData, UploadError>;
}

/// 计算小写十六进制 MD5
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// 分片上传会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedUploadSession {
    /// 本次上传的 uid（无连字符的 uuid）
    pub uploader_id: String,
    pub session_id: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub trace_id: Option<String>,
    pub ready: bool,
}

impl ChunkedUploadSession {
    /// 初始化会话
    pub async fn init<A: ChunkedUploadApi + ?Sized>(
        api: &A,
        name: &str,
        data: &[u8],
    ) -> Result<Self, UploadError> {
        let uploader_id = Uuid::new_v4().simple().to_string();
        let request = ChunkInitRequest {
            file_name: name.to_string(),
            file_size: data.len() as u64,
            md5: md5_hex(data),
            is_directory: false,
            uid: uploader_id.clone(),
        };

        let init = api.init(&request).await?;
        debug!(
            "分片会话已创建: session={}, chunks={}, chunk_size={}",
            init.session_id, init.total_chunks, init.chunk_size
        );

        Ok(Self {
            uploader_id,
            session_id: init.session_id,
            total_chunks: init.total_chunks,
            chunk_size: init.chunk_size,
            trace_id: None,
            ready: false,
        })
    }

    /// 按会话给出的分片大小切分数据
    ///
    /// 只有一个分片（或服务端未给出分片大小）时整个文件作为一个分片。
    /// 多分片时 total_chunks 必须恰好等于 ceil(len / chunk_size)，先校验再分配
    pub fn chunk_ranges(&self, len: usize) -> Result<Vec<std::ops::Range<usize>>, UploadError> {
        if self.total_chunks <= 1 || self.chunk_size == 0 {
            return Ok(vec![0..len]);
        }

        let expected = (len as u64).div_ceil(self.chunk_size);
        if u64::from(self.total_chunks) != expected {
            return Err(UploadError::rejected(format!(
                "分片信息与文件大小不一致: total_chunks={}, chunk_size={}, size={}",
                self.total_chunks, self.chunk_size, len
            )));
        }

        // expected > 1 意味着 chunk_size < len，可以安全转换为 usize
        let chunk_size = self.chunk_size as usize;
        Ok((0..len)
            .step_by(chunk_size)
            .map(|start| start..(start + chunk_size).min(len))
            .collect())
    }

    /// 依次上传全部分片，进度从 20 推进到 60
    pub async fn upload_chunks<A: ChunkedUploadApi + ?Sized>(
        &self,
        api: &A,
        data: &[u8],
        progress: &ProgressReporter,
    ) -> Result<(), UploadError> {
        let ranges = self.chunk_ranges(data.len())?;
        let total = ranges.len() as u64;
        for (index, range) in ranges.into_iter().enumerate() {
            api.upload_chunk(
                &self.session_id,
                index as u32,
                &self.uploader_id,
                data[range].to_vec(),
            )
            .await?;
            progress.report(20 + (40 * (index as u64 + 1) / total) as u8);
        }
        Ok(())
    }

    /// 完成上传，获取 trace_id
    pub async fn complete<A: ChunkedUploadApi + ?Sized>(
        &mut self,
        api: &A,
    ) -> Result<String, UploadError> {
        let data = api.complete(&self.session_id, &self.uploader_id).await?;
        self.trace_id = Some(data.trace_id.clone());
        Ok(data.trace_id)
    }

    /// 轮询直到就绪
    ///
    /// 查询失败不会中止轮询，但会消耗一次次数；次数耗尽返回 Timeout
    pub async fn wait_ready<A: ChunkedUploadApi + ?Sized>(
        &mut self,
        api: &A,
        poll: PollConfig,
    ) -> Result<PinMeUploadResult, UploadError> {
        let trace_id = self
            .trace_id
            .clone()
            .ok_or_else(|| UploadError::InvalidPayload("会话尚未完成，缺少 trace_id".into()))?;
        let max_attempts = poll.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match api.status(&trace_id, &self.uploader_id).await {
                Ok(status) if status.is_ready => {
                    let rst = status
                        .upload_rst
                        .ok_or_else(|| UploadError::rejected("状态已就绪但缺少上传结果"))?;
                    self.ready = true;
                    debug!("第 {} 次轮询时上传就绪: trace={}", attempt, trace_id);
                    return Ok(PinMeUploadResult::from_rst(rst, trace_id));
                }
                Ok(_) => debug!("上传尚未就绪 ({}/{})", attempt, max_attempts),
                Err(e) => warn!("查询上传状态失败 ({}/{}): {}", attempt, max_attempts, e),
            }

            if attempt < max_attempts {
                tokio::time::sleep(poll.interval).await;
            }
        }

        Err(UploadError::Timeout(format!(
            "上传状态轮询 {} 次后仍未就绪，请稍后重试",
            max_attempts
        )))
    }

    /// 执行完整流程，进度 10 -> 20 -> 60 -> 80 -> 100
    pub async fn run<A: ChunkedUploadApi + ?Sized>(
        api: &A,
        name: &str,
        data: &[u8],
        progress: &ProgressReporter,
        poll: PollConfig,
    ) -> Result<PinMeUploadResult, UploadError> {
        progress.report(10);
        let mut session = Self::init(api, name, data).await?;
        progress.report(20);

        session.upload_chunks(api, data, progress).await?;
        progress.report(60);

        session.complete(api).await?;
        progress.report(80);

        let result = session.wait_ready(api, poll).await?;
        progress.report(100);
        info!(
            "分片上传完成: {} -> hash={}, short={}",
            name, result.hash, result.short_url
        );
        Ok(result)
    }
}

/// 基于 HTTP 的分片接口实现
#[derive(Debug, Clone)]
pub struct HttpChunkedApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpChunkedApi {
    pub fn new(config: &IpfsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: config.pinme_api_base.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse<T: DeserializeOwned>(
        response: reqwest::Response,
        step: &str,
    ) -> Result<T, UploadError> {
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::UpstreamRejected {
                code: Some(status.as_u16() as i64),
                message: format!("{}: HTTP {}", step, status.as_u16()),
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await.map_err(UploadError::from_reqwest)?;
        if envelope.code != 200 {
            let message = if envelope.msg.is_empty() {
                format!("{}失败", step)
            } else {
                format!("{}: {}", step, envelope.msg)
            };
            return Err(UploadError::UpstreamRejected {
                code: Some(envelope.code),
                message,
            });
        }

        envelope
            .data
            .ok_or_else(|| UploadError::rejected(format!("{}: 响应缺少 data", step)))
    }
}

#[async_trait]
impl ChunkedUploadApi for HttpChunkedApi {
    async fn init(&self, request: &ChunkInitRequest) -> Result<ChunkInitData, UploadError> {
        let response = self
            .client
            .post(self.url("/chunk/init"))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;
        Self::parse(response, "初始化上传").await
    }

    async fn upload_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
        uid: &str,
        chunk: Vec<u8>,
    ) -> Result<ChunkUploadData, UploadError> {
        let form = Form::new()
            .text("session_id", session_id.to_string())
            .text("chunk_index", chunk_index.to_string())
            .text("uid", uid.to_string())
            .part("chunk", Part::bytes(chunk).file_name("chunk"));

        let response = self
            .client
            .post(self.url("/chunk/upload"))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;
        Self::parse(response, "上传文件块").await
    }

    async fn complete(&self, session_id: &str, uid: &str) -> Result<ChunkCompleteData, UploadError> {
        let request = ChunkCompleteRequest {
            session_id: session_id.to_string(),
            uid: uid.to_string(),
        };
        let response = self
            .client
            .post(self.url("/chunk/complete"))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;
        Self::parse(response, "完成上传").await
    }

    async fn status(&self, trace_id: &str, uid: &str) -> Result<UploadStatusData, UploadError> {
        let response = self
            .client
            .get(self.url("/up_status"))
            .timeout(self.timeout)
            .query(&[("trace_id", trace_id), ("uid", uid)])
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;
        Self::parse(response, "查询上传状态").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipfs::types::UploadRst;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Calls {
        init: Vec<ChunkInitRequest>,
        chunks: Vec<(u32, String, usize)>,
        complete_uids: Vec<String>,
        status_uids: Vec<String>,
    }

    /// 模拟分片接口
    struct MockApi {
        total_chunks: u32,
        chunk_size: u64,
        /// 第几次状态查询时就绪（None 表示永不就绪）
        ready_at: Option<usize>,
        /// 前 N 次状态查询返回错误
        status_errors: usize,
        fail_init: bool,
        calls: Mutex<Calls>,
    }

    impl MockApi {
        fn new(ready_at: Option<usize>) -> Self {
            Self {
                total_chunks: 1,
                chunk_size: 0,
                ready_at,
                status_errors: 0,
                fail_init: false,
                calls: Mutex::new(Calls::default()),
            }
        }

        fn status_calls(&self) -> usize {
            self.calls.lock().status_uids.len()
        }
    }

    #[async_trait]
    impl ChunkedUploadApi for MockApi {
        async fn init(&self, request: &ChunkInitRequest) -> Result<ChunkInitData, UploadError> {
            self.calls.lock().init.push(request.clone());
            if self.fail_init {
                return Err(UploadError::UpstreamRejected {
                    code: Some(500),
                    message: "初始化失败".into(),
                });
            }
            Ok(ChunkInitData {
                chunk_size: self.chunk_size,
                session_id: "sess-1".into(),
                total_chunks: self.total_chunks,
            })
        }

        async fn upload_chunk(
            &self,
            session_id: &str,
            chunk_index: u32,
            uid: &str,
            chunk: Vec<u8>,
        ) -> Result<ChunkUploadData, UploadError> {
            assert_eq!(session_id, "sess-1");
            self.calls
                .lock()
                .chunks
                .push((chunk_index, uid.to_string(), chunk.len()));
            Ok(ChunkUploadData {
                chunk_index,
                chunk_size: chunk.len() as u64,
            })
        }

        async fn complete(&self, _session_id: &str, uid: &str) -> Result<ChunkCompleteData, UploadError> {
            self.calls.lock().complete_uids.push(uid.to_string());
            Ok(ChunkCompleteData {
                trace_id: "trace-9".into(),
            })
        }

        async fn status(&self, trace_id: &str, uid: &str) -> Result<UploadStatusData, UploadError> {
            assert_eq!(trace_id, "trace-9");
            let n = {
                let mut calls = self.calls.lock();
                calls.status_uids.push(uid.to_string());
                calls.status_uids.len()
            };
            if n <= self.status_errors {
                return Err(UploadError::Transport(format!("poll error {}", n)));
            }
            let ready = self.ready_at.map_or(false, |at| n >= at);
            Ok(UploadStatusData {
                trace_id: trace_id.to_string(),
                is_ready: ready,
                upload_rst: ready.then(|| UploadRst {
                    bytes: 5,
                    hash: "bafyhash".into(),
                    name: "hello.txt".into(),
                    size: "5".into(),
                    short_url: "b06d1405".into(),
                }),
            })
        }
    }

    fn fast_poll(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_ready_on_fifth_poll_stops_polling() {
        let api = MockApi::new(Some(5));
        let result = ChunkedUploadSession::run(
            &api,
            "hello.txt",
            b"hello",
            &ProgressReporter::noop(),
            fast_poll(30),
        )
        .await
        .unwrap();

        assert_eq!(result.hash, "bafyhash");
        assert_eq!(result.short_url, "b06d1405");
        assert_eq!(result.trace_id, "trace-9");
        assert_eq!(api.status_calls(), 5);
    }

    #[tokio::test]
    async fn test_never_ready_times_out_after_max_polls() {
        let api = MockApi::new(None);
        let err = ChunkedUploadSession::run(
            &api,
            "hello.txt",
            b"hello",
            &ProgressReporter::noop(),
            fast_poll(30),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::Timeout(_)));
        assert_eq!(api.status_calls(), 30);
    }

    #[tokio::test]
    async fn test_poll_errors_consume_attempts() {
        let mut api = MockApi::new(Some(4));
        api.status_errors = 3;
        let result = ChunkedUploadSession::run(
            &api,
            "hello.txt",
            b"hello",
            &ProgressReporter::noop(),
            fast_poll(30),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(api.status_calls(), 4);

        let mut api = MockApi::new(Some(1));
        api.status_errors = 10;
        let err = ChunkedUploadSession::run(
            &api,
            "hello.txt",
            b"hello",
            &ProgressReporter::noop(),
            fast_poll(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::Timeout(_)));
        assert_eq!(api.status_calls(), 5);
    }

    #[tokio::test]
    async fn test_init_request_and_stable_uid() {
        let api = MockApi::new(Some(1));
        ChunkedUploadSession::run(
            &api,
            "hello.txt",
            b"hello",
            &ProgressReporter::noop(),
            fast_poll(3),
        )
        .await
        .unwrap();

        let calls = api.calls.lock();
        let init = &calls.init[0];
        assert_eq!(init.file_name, "hello.txt");
        assert_eq!(init.file_size, 5);
        assert_eq!(init.md5, "5d41402abc4b2a76b9719d911017c592");
        assert!(!init.is_directory);
        assert_eq!(init.uid.len(), 32);
        assert!(!init.uid.contains('-'));

        // 单分片携带整个文件
        assert_eq!(calls.chunks, vec![(0, init.uid.clone(), 5)]);
        assert_eq!(calls.complete_uids, vec![init.uid.clone()]);
        assert!(calls.status_uids.iter().all(|u| *u == init.uid));
    }

    #[tokio::test]
    async fn test_multi_chunk_slicing() {
        let mut api = MockApi::new(Some(1));
        api.total_chunks = 3;
        api.chunk_size = 4;

        ChunkedUploadSession::run(
            &api,
            "ten.bin",
            &[9u8; 10],
            &ProgressReporter::noop(),
            fast_poll(3),
        )
        .await
        .unwrap();

        let sizes: Vec<(u32, usize)> = api
            .calls
            .lock()
            .chunks
            .iter()
            .map(|(i, _, len)| (*i, *len))
            .collect();
        assert_eq!(sizes, vec![(0, 4), (1, 4), (2, 2)]);
    }

    #[tokio::test]
    async fn test_inconsistent_chunk_plan_rejected() {
        let mut api = MockApi::new(Some(1));
        api.total_chunks = 5;
        api.chunk_size = 4;

        let err = ChunkedUploadSession::run(
            &api,
            "ten.bin",
            &[9u8; 10],
            &ProgressReporter::noop(),
            fast_poll(3),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::UpstreamRejected { .. }));
        assert!(api.calls.lock().chunks.is_empty());
    }

    fn planned(total_chunks: u32, chunk_size: u64) -> ChunkedUploadSession {
        ChunkedUploadSession {
            uploader_id: "uid".into(),
            session_id: "sess".into(),
            total_chunks,
            chunk_size,
            trace_id: None,
            ready: false,
        }
    }

    #[test]
    fn test_chunk_plan_must_match_file_size() {
        assert_eq!(planned(3, 4).chunk_ranges(10).unwrap(), vec![0..4, 4..8, 8..10]);
        assert_eq!(planned(2, 5).chunk_ranges(10).unwrap(), vec![0..5, 5..10]);

        // 分片数远超文件大小：直接拒绝，不按 total_chunks 分配
        let err = planned(u32::MAX, 1).chunk_ranges(10).unwrap_err();
        assert!(matches!(err, UploadError::UpstreamRejected { .. }));

        // 分片覆盖不了整个文件：最后一片不能超过 chunk_size
        let err = planned(3, 4).chunk_ranges(100).unwrap_err();
        assert!(matches!(err, UploadError::UpstreamRejected { .. }));
    }

    #[tokio::test]
    async fn test_under_covering_chunk_plan_rejected() {
        let mut api = MockApi::new(Some(1));
        api.total_chunks = 2;
        api.chunk_size = 4;

        let err = ChunkedUploadSession::run(
            &api,
            "ten.bin",
            &[9u8; 10],
            &ProgressReporter::noop(),
            fast_poll(3),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::UpstreamRejected { .. }));
        assert!(api.calls.lock().chunks.is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_stops_flow() {
        let mut api = MockApi::new(Some(1));
        api.fail_init = true;

        let err = ChunkedUploadSession::run(
            &api,
            "x",
            b"x",
            &ProgressReporter::noop(),
            fast_poll(3),
        )
        .await
        .unwrap_err();
        assert_eq!(err.api_code(), 502);

        let calls = api.calls.lock();
        assert!(calls.chunks.is_empty());
        assert!(calls.status_uids.is_empty());
    }

    #[test]
    fn test_default_poll_config() {
        let poll = PollConfig::default();
        assert_eq!(poll.max_attempts, 30);
        assert_eq!(poll.interval, Duration::from_secs(1));
    }
}

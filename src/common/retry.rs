//! 随机抖动重试策略
//!
//! 中转后端（Telegram Bot API）自身带有秒级的限流窗口，
//! 这里使用固定区间内的随机等待而不是指数退避，打散并发请求的重试时间点

use crate::common::error::Retriable;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 中转后端默认尝试次数（含首次请求）
pub const RELAY_ATTEMPTS: u32 = 3;

/// 中转后端默认最小等待: 10s
pub const RELAY_MIN_DELAY: Duration = Duration::from_secs(10);

/// 中转后端默认最大等待: 15s
pub const RELAY_MAX_DELAY: Duration = Duration::from_secs(15);

/// 重试策略（无状态，每次调用独立执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（>= 1）
    attempts: u32,
    /// 最小等待
    min_delay: Duration,
    /// 最大等待
    max_delay: Duration,
}

impl RetryPolicy {
    /// 创建重试策略
    ///
    /// `attempts` 至少为 1；若 `min_delay > max_delay` 则交换两者
    pub fn new(attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };
        Self {
            attempts: attempts.max(1),
            min_delay,
            max_delay,
        }
    }

    /// 中转后端默认策略: 3 次尝试，10s~15s 随机间隔
    pub fn relay_default() -> Self {
        Self::new(RELAY_ATTEMPTS, RELAY_MIN_DELAY, RELAY_MAX_DELAY)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// 在 [min_delay, max_delay] 内均匀随机取一个等待时长
    pub fn next_delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// 执行操作，失败时按策略重试
    ///
    /// - 所有尝试严格串行
    /// - 最后一次失败后立即返回该次错误，不再等待
    /// - 不可重试的错误直接返回，不消耗剩余次数
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retriable + std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.attempts || !e.is_retriable() {
                        return Err(e);
                    }

                    let delay = self.next_delay();
                    warn!(
                        "第 {} 次请求失败，{:.1}s 后重试: {}",
                        attempt,
                        delay.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::relay_default()
    }
}

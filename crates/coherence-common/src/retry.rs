//! API 调用重试模块
//!
//! 对返回 HTTP 429 的 Kubernetes API 调用进行有界的指数退避重试，
//! 退避时间带随机抖动，并且每次调用都有独立的超时。

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// 默认单次请求超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次调用）
    pub max_retries: u32,
    /// 初始退避时间
    pub base_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 单次调用超时
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重试前的退避上限（未加抖动）
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 带全抖动的退避时间，取值范围 [0, ceiling]
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }
}

/// 执行异步 API 调用，遇到 429 时按策略重试
pub async fn retry_on_too_many_requests<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, kube::Error>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.request_timeout, f()).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout(format!(
                "请求在 {:?} 内未完成",
                policy.request_timeout
            ))),
        };

        match result {
            Err(e) if e.is_too_many_requests() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt, &mut rand::thread_rng());
                attempt += 1;
                warn!(attempt, ?delay, "API 请求被限流 (429)，稍后重试");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    debug!(attempt, "重试结束: {}", e);
                }
                return Err(e);
            }
            Ok(value) => return Ok(value),
        }
    }
}

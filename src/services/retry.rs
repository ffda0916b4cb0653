//! 调用重试 - 业务能力层
//!
//! 只负责"一次有界调用 + 重试"能力，不关心是哪个阶段、哪个模块

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::clients::{GenerationClient, GenerationError, GenerationPrompt};
use crate::config::Config;

/// 单次调用的预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBudget {
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// 重试策略
///
/// 瞬时失败（超时、限流）最多尝试 `max_attempts` 次（含第一次），
/// 两次尝试之间按 `base_delay * 2^(n-1)` 退避，不超过 `max_delay`。
/// 非瞬时失败立即返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms.max(config.backoff_base_ms)),
        }
    }

    /// 第 `attempt` 次（从 1 开始）失败后的等待时间
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// 一次带重试的调用结果
#[derive(Debug)]
pub struct CallOutcome {
    pub result: Result<String, GenerationError>,
    /// 实际发起的调用次数
    pub attempts: u32,
}

/// 发起有界调用，瞬时失败按策略重试
///
/// 超时由这里强制执行，客户端实现即使不遵守 `timeout` 参数也会被截断。
/// 给出 `deadline` 时，每次尝试的超时和重试前的退避都不会越过它。
pub async fn call_with_retry(
    client: &dyn GenerationClient,
    prompt: &GenerationPrompt,
    budget: CallBudget,
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    label: &str,
) -> CallOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let timeout = match deadline {
            Some(deadline) => budget.timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => budget.timeout,
        };
        if timeout.is_zero() {
            return CallOutcome {
                result: Err(GenerationError::timeout("已到达阶段期限")),
                attempts: attempt,
            };
        }

        attempt += 1;
        debug!("{} 第 {}/{} 次调用", label, attempt, max_attempts);

        let result = match tokio::time::timeout(
            timeout,
            client.generate(prompt, budget.max_tokens, timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::timeout(format!(
                "超过 {} 秒未返回",
                timeout.as_secs()
            ))),
        };

        match result {
            Ok(text) => {
                return CallOutcome {
                    result: Ok(text),
                    attempts: attempt,
                }
            }
            Err(e)
                if e.is_transient()
                    && attempt < max_attempts
                    && deadline.map_or(true, |d| Instant::now() + policy.backoff_for(attempt) < d) =>
            {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "{} 调用失败 (尝试 {}/{}): {}，等待 {:?} 后重试...",
                    label, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("{} 已重试 {} 次仍失败: {}", label, attempt, e);
                } else {
                    warn!("{} 调用失败，不可重试: {}", label, e);
                }
                return CallOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

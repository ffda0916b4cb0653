//! 调用节流策略 - 业务能力层
//!
//! 生成服务是共享且限流的资源，每个运行同一时间只发一个调用，
//! 并在两次调用之间按策略等待。这是唯一的准入控制手段。

use std::time::Duration;

use crate::config::Config;

/// 节流策略
pub trait PacingPolicy: Send + Sync {
    /// 第 `call_index` 个迭代项（从 0 开始）发起调用前需要等待的时间
    fn delay_before(&self, call_index: usize) -> Duration;
}

/// 固定间隔：第一个调用不等待，之后每个调用前等待固定时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.inter_call_delay())
    }
}

impl PacingPolicy for FixedDelay {
    fn delay_before(&self, call_index: usize) -> Duration {
        if call_index == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

/// 不等待
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

impl PacingPolicy for NoPacing {
    fn delay_before(&self, _call_index: usize) -> Duration {
        Duration::ZERO
    }
}

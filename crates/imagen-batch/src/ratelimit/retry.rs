//! 重试策略
//!
//! 固定间隔（默认）或指数退避

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{check_seconds, seconds_to_duration, ConfigError};

/// 退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// 每次重试前等待相同时间
    #[default]
    Fixed,
    /// backoff * 2^(attempt - 1)
    Exponential,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryPolicy {
    /// 每个任务最多发起的调用次数
    pub max_retries: u32,
    /// 重试前等待时间（秒）
    pub backoff_seconds: f64,
    /// 退避策略
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// 指数退避的最大等待时间（秒）
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: f64,
    /// 是否添加抖动（仅指数退避）
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_backoff_seconds() -> f64 {
    60.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_seconds: 5.0,
            strategy: BackoffStrategy::Fixed,
            max_backoff_seconds: default_max_backoff_seconds(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff_seconds: backoff.as_secs_f64(),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff_seconds = max_backoff.as_secs_f64();
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("retry_backoff_seconds", self.backoff_seconds, true)?;
        check_seconds("max_backoff_seconds", self.max_backoff_seconds, true)
    }

    /// 计算第 `attempt` 次失败（从 1 开始）之后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff_seconds;
        let delay = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(30) as i32;
                let mut delay = base * 2.0_f64.powi(exponent);
                if self.jitter {
                    let mut rng = rand::thread_rng();
                    delay *= 0.5 + rng.gen::<f64>();
                }
                delay.min(self.max_backoff_seconds)
            }
        };
        seconds_to_duration(delay)
    }
}

//! 速率限制器
//!
//! 滑动窗口日志：任意 `period` 时间窗口内最多放行 `max_calls` 次调用

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{check_seconds, seconds_to_duration, ConfigError};

/// 速率限制配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// 每个窗口内最多放行的调用数
    pub max_calls: u32,
    /// 窗口长度（秒）
    pub period_seconds: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 20,
            period_seconds: 60.0,
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_calls: u32, period: Duration) -> Self {
        Self {
            max_calls,
            period_seconds: period.as_secs_f64(),
        }
    }

    /// 窗口长度
    pub fn period(&self) -> Duration {
        seconds_to_duration(self.period_seconds)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_calls == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_calls",
                reason: "must be greater than 0".to_string(),
            });
        }
        check_seconds("period_seconds", self.period_seconds, false)
    }
}

/// 速率限制状态快照
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// 当前窗口内的放行次数
    pub admissions_in_window: usize,
    /// 窗口上限
    pub max_calls: u32,
    /// 窗口长度
    pub period: Duration,
    /// 距离下一个空位的时间（有空位时为零）
    pub time_until_next_slot: Duration,
}

/// 速率限制事件
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitEvent {
    /// 调用方需要等待
    Throttled {
        wait: Duration,
        in_window: usize,
        limit: u32,
    },
}

const INITIAL_WINDOW_CAPACITY: usize = 1024;

/// 速率限制器
///
/// 所有 worker 共享同一个实例（`Arc<RateLimiter>`）。
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    window: Mutex<VecDeque<Instant>>,
    event_tx: Option<mpsc::UnboundedSender<RateLimitEvent>>,
}

impl RateLimiter {
    /// 创建新的速率限制器，`max_calls == 0` 或非法窗口长度会被拒绝
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            max_calls: config.max_calls as usize,
            period: config.period(),
            // 窗口按需增长，巨大的 max_calls 不会预先分配
            window: Mutex::new(VecDeque::with_capacity(
                (config.max_calls as usize).min(INITIAL_WINDOW_CAPACITY),
            )),
            event_tx: None,
        })
    }

    /// 设置事件通道
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<RateLimitEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 移除窗口外的旧记录
    fn prune(window: &mut VecDeque<Instant>, period: Duration, now: Instant) {
        while window
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= period)
        {
            window.pop_front();
        }
    }

    /// 最早一条记录离开窗口前的剩余时间；`Instant` 溢出时按整个窗口计
    fn time_until_expiry(&self, oldest: Instant, now: Instant) -> Duration {
        oldest
            .checked_add(self.period)
            .map(|expiry| expiry.saturating_duration_since(now))
            .unwrap_or(self.period)
    }

    /// 在锁内完成 剪枝 + 检查 + 记录；返回 `None` 表示已放行，否则返回需要等待的时长
    fn admit_or_wait(&self) -> Option<(Duration, usize)> {
        let mut window = self.window.lock();
        let now = Instant::now();
        Self::prune(&mut window, self.period, now);

        if window.len() < self.max_calls {
            window.push_back(now);
            return None;
        }

        let wait = window
            .front()
            .map(|oldest| self.time_until_expiry(*oldest, now))
            .unwrap_or(Duration::ZERO);
        Some((wait, window.len()))
    }

    /// 等待直到可以发起调用，并记录本次放行
    ///
    /// 醒来后总是重新检查窗口，其他调用方可能在休眠期间占用了空位。
    pub async fn acquire(&self) {
        loop {
            let Some((wait, in_window)) = self.admit_or_wait() else {
                return;
            };

            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                in_window,
                limit = self.max_calls,
                "rate limit reached, waiting for a free slot"
            );
            if let Some(ref tx) = self.event_tx {
                let _ = tx.send(RateLimitEvent::Throttled {
                    wait,
                    in_window,
                    limit: self.max_calls as u32,
                });
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// 非阻塞尝试放行
    pub fn try_acquire(&self) -> bool {
        self.admit_or_wait().is_none()
    }

    /// 获取当前状态
    pub fn state(&self) -> RateLimitState {
        let mut window = self.window.lock();
        let now = Instant::now();
        Self::prune(&mut window, self.period, now);

        let time_until_next_slot = if window.len() < self.max_calls {
            Duration::ZERO
        } else {
            window
                .front()
                .map(|oldest| self.time_until_expiry(*oldest, now))
                .unwrap_or(Duration::ZERO)
        };

        RateLimitState {
            admissions_in_window: window.len(),
            max_calls: self.max_calls as u32,
            period: self.period,
            time_until_next_slot,
        }
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls as u32
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

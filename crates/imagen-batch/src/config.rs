//! 批处理配置
//!
//! 默认值 → YAML 文件 → 环境变量，命令行参数由调用方最后覆盖

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::{RateLimitConfig, RetryPolicy};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "IMAGEN_BATCH_";

/// 窗口、超时和退避时长的上限（1 天）
pub const MAX_DURATION_SECONDS: f64 = 86_400.0;

/// 配置错误，启动阶段即终止运行
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for environment variable {name}: {value:?}")]
    InvalidEnv { name: String, value: String },
}

/// 工作池配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PoolConfig {
    /// 同时执行的最大任务数
    pub max_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_concurrency: 5 }
    }
}

/// 批处理运行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BatchConfig {
    pub rate_limit: RateLimitConfig,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    /// 单次远程调用超时（秒）
    pub attempt_timeout_seconds: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            attempt_timeout_seconds: 120.0,
        }
    }
}

impl BatchConfig {
    /// 从 YAML 文件加载，缺省字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 应用 `IMAGEN_BATCH_*` 环境变量覆盖
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_value("MAX_CALLS")? {
            self.rate_limit.max_calls = v;
        }
        if let Some(v) = env_value("PERIOD_SECONDS")? {
            self.rate_limit.period_seconds = v;
        }
        if let Some(v) = env_value("MAX_CONCURRENCY")? {
            self.pool.max_concurrency = v;
        }
        if let Some(v) = env_value("MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_value("RETRY_BACKOFF_SECONDS")? {
            self.retry.backoff_seconds = v;
        }
        if let Some(v) = env_value("ATTEMPT_TIMEOUT_SECONDS")? {
            self.attempt_timeout_seconds = v;
        }
        Ok(())
    }

    /// 校验所有配额参数
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;
        if self.pool.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrency",
                reason: "must be greater than 0".to_string(),
            });
        }
        self.retry.validate()?;
        check_seconds("attempt_timeout_seconds", self.attempt_timeout_seconds, false)
    }

    pub fn attempt_timeout(&self) -> Duration {
        seconds_to_duration(self.attempt_timeout_seconds)
    }
}

/// 校验秒数：有限、在 (0 或 >= 0) 与 [`MAX_DURATION_SECONDS`] 之间
pub(crate) fn check_seconds(
    field: &'static str,
    value: f64,
    allow_zero: bool,
) -> Result<(), ConfigError> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !lower_ok {
        let bound = if allow_zero { ">= 0" } else { "a positive number" };
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("must be {}, got {}", bound, value),
        });
    }
    if value > MAX_DURATION_SECONDS {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("must be at most {} seconds, got {}", MAX_DURATION_SECONDS, value),
        });
    }
    Ok(())
}

/// 秒数转 `Duration`，非法值收敛到 `[0, MAX_DURATION_SECONDS]`
pub(crate) fn seconds_to_duration(value: f64) -> Duration {
    if !value.is_finite() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value.min(MAX_DURATION_SECONDS)).unwrap_or(Duration::ZERO)
}

fn env_value<T: std::str::FromStr>(suffix: &str) -> Result<Option<T>, ConfigError> {
    let name = format!("{}{}", ENV_PREFIX, suffix);
    match std::env::var(&name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}

//! 超时和取消控制
//!
//! 远程调用的单次超时，以及可被取消令牌打断的等待

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// 超时错误
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Operation timed out after {timeout:?}")]
pub struct TimeoutError {
    pub timeout: Duration,
}

/// 取消错误
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Operation aborted")]
pub struct AbortError;

/// 带超时执行异步操作
pub async fn with_timeout<T, F>(future: F, limit: Duration) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(limit, future)
        .await
        .map_err(|_| TimeoutError { timeout: limit })
}

/// 可取消的延迟
pub async fn cancelable_delay(
    delay: Duration,
    cancel_token: Option<&CancellationToken>,
) -> Result<(), AbortError> {
    let sleep = tokio::time::sleep(delay);

    match cancel_token {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(AbortError),
                _ = sleep => Ok(()),
            }
        }
        None => {
            sleep.await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_ok() {
        let result = with_timeout(async { 42 }, Duration::from_secs(1)).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            tokio::time::sleep(Duration::from_secs(10)),
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(
            result,
            Err(TimeoutError {
                timeout: Duration::from_secs(2)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelable_delay_completes() {
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();
        assert!(cancelable_delay(Duration::from_secs(3), Some(&token))
            .await
            .is_ok());
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelable_delay_aborts() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = cancelable_delay(Duration::from_secs(30), Some(&token)).await;
        assert_eq!(result, Err(AbortError));
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}

//! 指数退避重试执行器。
//!
//! 第 `n` 次失败（从 0 计）后等待 `base * 2^n + jitter`，jitter 在 `[0, max_jitter)`
//! 内均匀分布；最后一次失败后不再等待。只有 [`AttemptError::Retryable`] 会被重试，
//! [`AttemptError::Fatal`] 立即结束。全部失败时返回 [`Exhausted`]，不会 panic。

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use super::pacing::Pacer;

pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// 第 `attempt` 次（从 0 计）失败后的固定退避部分，不含抖动。
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// 单次尝试的失败类型。
#[derive(Debug)]
pub enum AttemptError {
    /// 网络/渲染等暂时性错误，退避后重试。
    Retryable(anyhow::Error),
    /// 重试无意义（例如登录态失效），立刻返回。
    Fatal(anyhow::Error),
}

impl AttemptError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(err.into())
    }

    fn into_inner(self) -> (anyhow::Error, bool) {
        match self {
            Self::Retryable(e) => (e, false),
            Self::Fatal(e) => (e, true),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable(e) => write!(f, "{e:#}"),
            Self::Fatal(e) => write!(f, "fatal: {e:#}"),
        }
    }
}

/// 所有尝试都失败（或遇到致命错误）后的结果。
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub fatal: bool,
    pub last: anyhow::Error,
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fatal {
            write!(f, "第 {} 次尝试遇到不可重试错误: {:#}", self.attempts, self.last)
        } else {
            write!(f, "{} 次尝试均失败: {:#}", self.attempts, self.last)
        }
    }
}

impl std::error::Error for Exhausted {}

/// 执行 `op`，失败时按策略退避重试。`op` 收到当前尝试序号（从 0 计）。
pub fn execute<T, F>(
    policy: &RetryPolicy,
    pacer: &dyn Pacer,
    description: &str,
    mut op: F,
) -> Result<T, Exhausted>
where
    F: FnMut(u32) -> Result<T, AttemptError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        let err = match op(attempt) {
            Ok(value) => {
                if attempt > 0 {
                    debug!(target: "retry", "{} 在第 {} 次尝试成功", description, attempt + 1);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let (last, fatal) = err.into_inner();
        let attempts = attempt + 1;
        if fatal {
            warn!(
                target: "retry",
                "{} 第 {}/{} 次尝试遇到不可重试错误: {:#}",
                description, attempts, max_attempts, last
            );
            return Err(Exhausted {
                attempts,
                fatal: true,
                last,
            });
        }
        if attempts >= max_attempts {
            warn!(
                target: "retry",
                "{} 全部 {} 次尝试均失败: {:#}",
                description, max_attempts, last
            );
            return Err(Exhausted {
                attempts,
                fatal: false,
                last,
            });
        }

        let delay = policy.backoff_for(attempt) + pacer.jitter(policy.max_jitter);
        warn!(
            target: "retry",
            attempt = attempts,
            delay_s = delay.as_secs_f64(),
            "{} 第 {}/{} 次尝试失败: {:#}，{:.1}s 后重试",
            description,
            attempts,
            max_attempts,
            last,
            delay.as_secs_f64()
        );
        pacer.sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::pacing::NoPacing;
    use crate::base_system::pacing::testing::RecordingPacer;
    use anyhow::anyhow;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn returns_first_success_without_sleeping() {
        let pacer = RecordingPacer::default();
        let policy = RetryPolicy::new(3, secs(5));
        let out = execute(&policy, &pacer, "ok", |_| Ok::<_, AttemptError>(42));
        assert_eq!(out.unwrap(), 42);
        assert!(pacer.sleeps.borrow().is_empty());
    }

    #[test]
    fn delays_grow_exponentially_with_bounded_jitter() {
        for _ in 0..50 {
            let pacer = RecordingPacer::default();
            let policy = RetryPolicy::new(3, secs(5));
            let out: Result<(), _> = execute(&policy, &pacer, "always fails", |_| {
                Err(AttemptError::retryable(anyhow!("boom")))
            });

            let exhausted = out.unwrap_err();
            assert_eq!(exhausted.attempts, 3);
            assert!(!exhausted.fatal);

            let sleeps = pacer.sleeps.borrow();
            assert_eq!(sleeps.len(), 2, "no wait after the final attempt");
            assert!(sleeps[0] >= secs(5) && sleeps[0] < secs(7));
            assert!(sleeps[1] >= secs(10) && sleeps[1] < secs(12));
            let total = pacer.total();
            assert!(total >= secs(15) && total < secs(19));
        }
    }

    #[test]
    fn fatal_error_stops_immediately() {
        let pacer = RecordingPacer::default();
        let policy = RetryPolicy::new(5, secs(1));
        let mut calls = 0;
        let out: Result<(), _> = execute(&policy, &pacer, "fatal", |_| {
            calls += 1;
            Err(AttemptError::fatal(anyhow!("redirected to login")))
        });
        let exhausted = out.unwrap_err();
        assert!(exhausted.fatal);
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(calls, 1);
        assert!(pacer.sleeps.borrow().is_empty());
    }

    #[test]
    fn recovers_after_transient_failures() {
        let policy = RetryPolicy::new(4, secs(1));
        let out = execute(&policy, &NoPacing, "flaky", |attempt| {
            if attempt < 2 {
                Err(AttemptError::retryable(anyhow!("timeout")))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 2);
    }

    #[test]
    fn exhausted_carries_last_cause() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let out: Result<(), _> = execute(&policy, &NoPacing, "causes", |attempt| {
            Err(AttemptError::retryable(anyhow!("cause #{attempt}")))
        });
        assert!(out.unwrap_err().last.to_string().contains("cause #1"));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        };
        let mut calls = 0;
        let _: Result<(), _> = execute(&policy, &NoPacing, "once", |_| {
            calls += 1;
            Err(AttemptError::retryable(anyhow!("nope")))
        });
        assert_eq!(calls, 1);
    }
}

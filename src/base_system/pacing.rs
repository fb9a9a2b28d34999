//! 操作节奏（停顿/抖动）策略。
//!
//! 所有“像人一样”的随机停顿都通过 [`Pacer`] 注入，正确性不依赖于它；
//! 关闭 `humanize` 或在测试中使用 [`NoPacing`] 时不会产生任何等待。

use std::time::Duration;

use rand::Rng;

/// 一段随机停顿的取值范围 `[min, max)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceRange {
    pub min: Duration,
    pub max: Duration,
}

impl PaceRange {
    pub const fn millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    pub const fn secs(min: u64, max: u64) -> Self {
        Self::millis(min * 1000, max * 1000)
    }
}

// 常用停顿
pub const AFTER_HOME_LOAD: PaceRange = PaceRange::secs(10, 15);
pub const AFTER_PAGE_LOAD: PaceRange = PaceRange::secs(2, 4);
pub const AFTER_CLICK: PaceRange = PaceRange::secs(1, 2);
pub const BETWEEN_KEYS: PaceRange = PaceRange::millis(300, 800);
pub const AFTER_LOGIN_SUBMIT: PaceRange = PaceRange::secs(8, 12);
pub const BETWEEN_FEED_PAGES: PaceRange = PaceRange::secs(1, 2);
pub const BETWEEN_DOWNLOADS: PaceRange = PaceRange::millis(500, 1500);

pub trait Pacer {
    /// 阻塞当前线程 `delay`。
    fn sleep(&self, delay: Duration);

    /// `[0, max)` 内均匀分布的随机时长；`max` 为零时返回零。
    fn jitter(&self, max: Duration) -> Duration;

    fn pause(&self, range: PaceRange) {
        let spread = range.max.saturating_sub(range.min);
        self.sleep(range.min + self.jitter(spread));
    }
}

/// 真实等待 + 随机抖动。
#[derive(Debug, Default, Clone, Copy)]
pub struct HumanPacer;

impl Pacer for HumanPacer {
    fn sleep(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    fn jitter(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let nanos = rand::rng().random_range(0..max.as_nanos().min(u64::MAX as u128) as u64);
        Duration::from_nanos(nanos)
    }
}

/// 不等待、无抖动。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPacing;

impl Pacer for NoPacing {
    fn sleep(&self, _delay: Duration) {}

    fn jitter(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

/// 仅对停顿生效的开关：重试退避需要的睡眠与抖动仍然交给 `inner`。
#[derive(Debug, Clone, Copy)]
pub struct Quiet<P> {
    inner: P,
}

impl<P: Pacer> Quiet<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Pacer> Pacer for Quiet<P> {
    fn sleep(&self, delay: Duration) {
        self.inner.sleep(delay);
    }

    fn jitter(&self, max: Duration) -> Duration {
        self.inner.jitter(max)
    }

    fn pause(&self, _range: PaceRange) {}
}

pub fn pacer_for(humanize: bool) -> Box<dyn Pacer> {
    if humanize {
        Box::new(HumanPacer)
    } else {
        Box::new(Quiet::new(HumanPacer))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let max = Duration::from_secs(2);
        for _ in 0..200 {
            let j = HumanPacer.jitter(max);
            assert!(j < max);
        }
        assert_eq!(HumanPacer.jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn quiet_pacer_skips_pauses_but_keeps_jitter_source() {
        let quiet = Quiet::new(testing::RecordingPacer::default());
        quiet.pause(AFTER_HOME_LOAD);
        assert!(quiet.inner.sleeps.borrow().is_empty());
        quiet.sleep(Duration::from_secs(3));
        assert_eq!(quiet.inner.total(), Duration::from_secs(3));
    }

    #[test]
    fn no_pacing_never_jitters() {
        assert_eq!(NoPacing.jitter(Duration::from_secs(5)), Duration::ZERO);
    }
}

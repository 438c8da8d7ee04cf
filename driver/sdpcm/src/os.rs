//! 平台服务：单调时钟、睡眠、起线程
//!
//! 引擎里所有等待都写成 [`Deadline`] 加有界轮询，不依赖循环次数换算时间。

use alloc::boxed::Box;

use axerrno::AxResult;

/// 引擎所需的平台能力。
pub trait OsServices: Send + Sync + 'static {
    /// 单调毫秒时钟。
    fn now_ms(&self) -> u64;

    /// 让出当前线程约 `ms` 毫秒。
    fn sleep_ms(&self, ms: u64);

    /// 起一个后台线程运行 `entry`。
    fn spawn(&self, name: &'static str, entry: Box<dyn FnOnce() + Send + 'static>) -> AxResult<()>;
}

/// 截止时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_ms: u64,
}

impl Deadline {
    pub fn after(os: &dyn OsServices, timeout_ms: u64) -> Self {
        Self {
            at_ms: os.now_ms().saturating_add(timeout_ms),
        }
    }

    pub fn expired(&self, os: &dyn OsServices) -> bool {
        os.now_ms() >= self.at_ms
    }

    pub fn remaining_ms(&self, os: &dyn OsServices) -> u64 {
        self.at_ms.saturating_sub(os.now_ms())
    }
}

/// 有界轮询参数：截止时间与次数上限同时生效，先到者为准。
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollLimits {
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub max_polls: u32,
}

/// 反复调用 `probe` 直到返回 `Some`，或截止/次数用尽后返回 `None`。`probe` 的错误立即返回。
pub(crate) fn poll_until<T, E>(
    os: &dyn OsServices,
    poll: PollLimits,
    mut probe: impl FnMut() -> Result<Option<T>, E>,
) -> Result<Option<T>, E> {
    let deadline = Deadline::after(os, poll.timeout_ms);
    let mut polls = 0u32;
    loop {
        if let Some(v) = probe()? {
            return Ok(Some(v));
        }
        polls += 1;
        if polls >= poll.max_polls || deadline.expired(os) {
            return Ok(None);
        }
        if poll.interval_ms > 0 {
            os.sleep_ms(poll.interval_ms.min(deadline.remaining_ms(os)));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeClock;
    use super::*;

    #[test]
    fn poll_gives_up_at_deadline() {
        let clock = FakeClock::default();
        let poll = PollLimits {
            timeout_ms: 10,
            interval_ms: 1,
            max_polls: 1000,
        };
        let mut calls = 0;
        let r: Result<Option<()>, ()> = poll_until(&clock, poll, || {
            calls += 1;
            Ok(None)
        });
        assert_eq!(r, Ok(None));
        assert_eq!(calls, 11);
        assert!(clock.now_ms() >= 10);
    }

    #[test]
    fn poll_bounded_by_count_without_sleep() {
        let clock = FakeClock::default();
        let poll = PollLimits {
            timeout_ms: 1000,
            interval_ms: 0,
            max_polls: 5,
        };
        let mut calls = 0;
        let r: Result<Option<u8>, ()> = poll_until(&clock, poll, || {
            calls += 1;
            Ok(if calls == 3 { Some(7) } else { None })
        });
        assert_eq!(r, Ok(Some(7)));

        calls = 0;
        let r: Result<Option<u8>, ()> = poll_until(&clock, poll, || {
            calls += 1;
            Ok(None)
        });
        assert_eq!(r, Ok(None));
        assert_eq!(calls, 5);
    }

    #[test]
    fn poll_does_not_sleep_past_deadline() {
        let clock = FakeClock::default();
        let poll = PollLimits {
            timeout_ms: 7,
            interval_ms: 5,
            max_polls: 100,
        };
        let mut calls = 0;
        let r: Result<Option<()>, ()> = poll_until(&clock, poll, || {
            calls += 1;
            Ok(None)
        });
        assert_eq!(r, Ok(None));
        // 0、5 两次后只睡剩下的 2 ms
        assert_eq!(calls, 3);
        assert_eq!(clock.now_ms(), 7);
    }

    #[test]
    fn deadline_remaining() {
        let clock = FakeClock::default();
        let d = Deadline::after(&clock, 20);
        clock.advance(5);
        assert_eq!(d.remaining_ms(&clock), 15);
        assert!(!d.expired(&clock));
        clock.advance(15);
        assert!(d.expired(&clock));
    }
}

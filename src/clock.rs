use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond clock used to measure idle time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// [`Clock`] backed by [`Instant`], counting from its own creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(MonotonicClock::new())
}

/// Tracks how long a retry loop has gone without progress.
pub(crate) struct IdleTimer {
    clock: Arc<dyn Clock>,
    timeout_ms: u64,
    last_progress: u64,
}

impl IdleTimer {
    pub(crate) fn start(clock: &Arc<dyn Clock>, timeout_ms: u64) -> Self {
        Self {
            clock: Arc::clone(clock),
            timeout_ms,
            last_progress: clock.now_ms(),
        }
    }

    pub(crate) fn progress(&mut self) {
        self.last_progress = self.clock.now_ms();
    }

    /// True once the idle time is strictly greater than the timeout.
    pub(crate) fn expired(&self) -> bool {
        self.clock.now_ms().saturating_sub(self.last_progress) > self.timeout_ms
    }

    pub(crate) fn idle_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.last_progress)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock that only moves when a test tells it to.
    #[derive(Clone, Default)]
    pub struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, ms: u64) {
            self.now.store(ms, Ordering::SeqCst);
        }

        pub fn advance(&self, ms: u64) {
            self.now.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ManualClock;
    use super::*;

    #[test]
    fn idle_timer_expires_only_past_the_timeout() {
        let manual = ManualClock::new();
        let clock: Arc<dyn Clock> = Arc::new(manual.clone());
        let mut timer = IdleTimer::start(&clock, 100);

        manual.set(100);
        assert!(!timer.expired());

        manual.set(101);
        assert!(timer.expired());

        timer.progress();
        assert!(!timer.expired());
        assert_eq!(timer.idle_ms(), 0);
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock milliseconds for entry ids and delivery times.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

pub mod control {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::Clock;

    /// A clock that only moves when told to.
    ///
    /// ```
    /// use mess_streams::clock::{control::FrozenClock, Clock};
    ///
    /// let clk = FrozenClock::new(1_000);
    /// assert_eq!(clk.now_millis(), 1_000);
    /// clk.advance(250);
    /// assert_eq!(clk.now_millis(), 1_250);
    /// ```
    #[derive(Debug, Default)]
    pub struct FrozenClock(AtomicU64);

    impl FrozenClock {
        #[must_use]
        pub const fn new(ms: u64) -> Self {
            Self(AtomicU64::new(ms))
        }

        pub fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }

        pub fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FrozenClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}

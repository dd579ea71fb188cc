#[cfg(test)]
use std::cell::Cell;

/// Wall clock in Unix epoch milliseconds.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

/// Hand-driven clock for simulations and tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<i64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self { now: Cell::new(start_ms) }
    }

    pub fn set(&self, ms: i64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: i64) {
        self.now.set(self.now.get() + ms);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

/// Format epoch milliseconds as local date and time for status output.
pub fn fmt_local(ms: i64) -> String {
    use chrono::TimeZone;
    match chrono::Local.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None    => format!("{}ms", ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read<C: Clock>(clock: C) -> i64 {
        clock.now_ms()
    }

    #[test]
    fn borrowed_clock_follows_the_original() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(read(&clock), 15);
        clock.set(40);
        assert_eq!(read(&&clock), 40);
    }
}

//! Server clock.
//!
//! Every change is stamped with the server clock and the feed cursor moves
//! along it. The clock must be strictly monotonic: two reads never return
//! the same instant, and a later read is always greater. A wall clock that
//! steps backwards is held at its last value plus one microsecond.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

/// Source of server timestamps.
pub trait Clock: Send + Sync {
    /// Returns the next timestamp, strictly greater than any returned before.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock with microsecond resolution, forced strictly monotonic.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: Mutex<i64>,
}

impl MonotonicClock {
    /// Creates a new clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut last = self.last_micros.lock();
        let next = wall.max(*last + 1);
        *last = next;
        from_micros(next)
    }
}

/// Clock driven by tests.
///
/// Each read returns the current value and then advances it by one
/// microsecond, so stamps stay unique without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    micros: Mutex<i64>,
}

impl ManualClock {
    /// Creates a clock starting at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: Mutex::new(start.timestamp_micros()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let step = by.num_microseconds().unwrap_or(i64::MAX);
        let mut micros = self.micros.lock();
        *micros = micros.saturating_add(step.max(0));
    }

    /// Returns the value the next read will produce, without consuming it.
    pub fn peek(&self) -> DateTime<Utc> {
        from_micros(*self.micros.lock())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut micros = self.micros.lock();
        let current = *micros;
        *micros += 1;
        from_micros(current)
    }
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_repeats() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn manual_clock_steps() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + Duration::microseconds(1));

        clock.advance(Duration::seconds(10));
        assert_eq!(clock.peek(), start + Duration::seconds(10) + Duration::microseconds(2));
        assert!(clock.now() > start + Duration::seconds(10));
    }

    #[test]
    fn concurrent_reads_are_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..500).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for stamp in handle.join().unwrap() {
                assert!(seen.insert(stamp));
            }
        }
    }
}

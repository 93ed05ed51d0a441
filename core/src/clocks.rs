// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Sources of the current time.
//!
//! Timestamps handed out by these clocks are truncated to microseconds, which is the finest
//! resolution that PostgreSQL can store.  Keeping every timestamp at that resolution makes values
//! read back from any database compare equal to the ones that were written.

use time::{Duration, OffsetDateTime};

/// Drops the sub-microsecond part of `ts`.
pub fn truncate_to_micros(ts: OffsetDateTime) -> OffsetDateTime {
    ts - Duration::nanoseconds(i64::from(ts.nanosecond() % 1_000))
}

/// Provider of the current time, injected into the components that stamp records.
pub trait Clock {
    /// Returns the current UTC time with microsecond resolution.
    fn now_utc(&self) -> OffsetDateTime;
}

/// Clock backed by the operating system's wall time.
#[derive(Clone, Default)]
pub struct SystemClock {}

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        truncate_to_micros(OffsetDateTime::now_utc())
    }
}

/// Clocks for tests.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use std::sync::Mutex;

    /// A clock that stays still until a test moves it forward.
    pub struct ManualClock {
        /// Time that the clock reports.
        now: Mutex<OffsetDateTime>,
    }

    impl ManualClock {
        /// Creates a clock frozen at `now`, which must not carry sub-microsecond digits.
        pub fn new(now: OffsetDateTime) -> Self {
            assert_eq!(now, truncate_to_micros(now), "Sub-microsecond timestamps not supported");
            Self { now: Mutex::new(now) }
        }

        /// Moves the clock forward by `delta`, which must be a whole number of microseconds.
        pub fn advance(&self, delta: std::time::Duration) {
            assert_eq!(0, delta.subsec_nanos() % 1_000, "Sub-microsecond deltas not supported");
            let mut now = self.now.lock().unwrap();
            *now += delta;
        }
    }

    impl Clock for ManualClock {
        fn now_utc(&self) -> OffsetDateTime {
            *self.now.lock().unwrap()
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_truncate_to_micros() {
        assert_eq!(
            datetime!(2024-01-01 10:00:00.123456 UTC),
            truncate_to_micros(datetime!(2024-01-01 10:00:00.123456789 UTC))
        );
        assert_eq!(
            datetime!(2024-01-01 10:00:00 UTC),
            truncate_to_micros(datetime!(2024-01-01 10:00:00 UTC))
        );
        assert_eq!(
            datetime!(1969-12-31 23:59:59.999999 UTC),
            truncate_to_micros(datetime!(1969-12-31 23:59:59.9999995 UTC))
        );
    }

    #[test]
    fn test_systemclock_is_monotonic_enough() {
        let clock = SystemClock::default();
        let before = clock.now_utc();
        let after = clock.now_utc();
        assert!(after >= before);
        assert_eq!(0, after.nanosecond() % 1_000);
    }
}

/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Monotonic timestamps for outgoing directory commands.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Smallest step between two timestamps handed out by the provider, in nanoseconds.
const TICK_NANOS: i64 = 100;

/// Hands out strictly increasing timestamps.
///
/// Two calls within the same clock tick would otherwise produce equal values, and the
/// directory would treat the second command as a duplicate of the first. When the
/// clock has not moved past the previous value, the next 100 ns slot is used instead.
pub struct UniqueTimestampProvider {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl UniqueTimestampProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    pub fn next_utc_timestamp(&self) -> DateTime<Utc> {
        let now = self.clock.utc_now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match *last {
            Some(previous) if now <= previous => previous + Duration::nanoseconds(TICK_NANOS),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

impl Default for UniqueTimestampProvider {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, UniqueTimestampProvider};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    struct FrozenClock(Mutex<DateTime<Utc>>);

    impl Clock for FrozenClock {
        fn utc_now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn timestamps_are_unique_when_the_clock_does_not_move() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let provider = UniqueTimestampProvider::new(Arc::new(FrozenClock(Mutex::new(now))));

        let first = provider.next_utc_timestamp();
        let second = provider.next_utc_timestamp();
        let third = provider.next_utc_timestamp();

        assert_eq!(first, now);
        assert_eq!(second, now + Duration::nanoseconds(100));
        assert_eq!(third, now + Duration::nanoseconds(200));
    }

    #[test]
    fn timestamps_follow_the_clock_once_it_moves_ahead() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(FrozenClock(Mutex::new(now)));
        let provider = UniqueTimestampProvider::new(clock.clone());

        provider.next_utc_timestamp();
        provider.next_utc_timestamp();
        *clock.0.lock().unwrap() = now + Duration::seconds(1);

        assert_eq!(provider.next_utc_timestamp(), now + Duration::seconds(1));
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(FrozenClock(Mutex::new(now)));
        let provider = UniqueTimestampProvider::new(clock.clone());

        let first = provider.next_utc_timestamp();
        *clock.0.lock().unwrap() = now - Duration::seconds(5);

        assert!(provider.next_utc_timestamp() > first);
    }
}

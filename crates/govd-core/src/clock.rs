//! Day-boundary clock for the governance core.
//!
//! Every daily rule in this crate — the per-admin admission ledger and the
//! democratic once-per-day throttle — keys off the same question: "which
//! calendar day does this instant belong to?" The answer is computed here and
//! nowhere else, so the tracker and the lifecycle can never disagree about
//! where a day starts.
//!
//! Days are anchored to a fixed reference timezone (`America/Los_Angeles` by
//! default) and resolved through the timezone database, so daylight-saving
//! transitions shift the boundary by the real local offset instead of a
//! hand-rolled UTC delta. A transition day is simply 23 or 25 hours long.
//!
//! [`TimeSource`] decouples "now" from the system clock so tests can drive
//! every daily rollover deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// The reference timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";

/// Errors raised when constructing a [`DayClock`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ClockError {
    /// The timezone name is not present in the timezone database.
    #[error("unknown timezone: {name}")]
    UnknownTimezone {
        /// The name that failed to resolve.
        name: String,
    },
}

/// Source of the current wall-clock time, in unix seconds.
///
/// Production code uses [`SystemTimeSource`]; tests use [`ManualTimeSource`]
/// to step through day boundaries and expiration windows without sleeping.
pub trait TimeSource: Send + Sync {
    /// Current unix timestamp in seconds.
    fn now_unix(&self) -> i64;
}

/// [`TimeSource`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// A hand-driven [`TimeSource`] for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    /// Create a source frozen at the given unix timestamp.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Create a shared source frozen at the given unix timestamp.
    #[must_use]
    pub fn shared(now: i64) -> Arc<Self> {
        Arc::new(Self::new(now))
    }

    /// Overwrite the current timestamp.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the current timestamp by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Computes calendar-day boundaries in a fixed reference timezone.
#[derive(Debug, Clone, Copy)]
pub struct DayClock {
    tz: Tz,
}

impl DayClock {
    /// Create a clock anchored to the given timezone.
    #[must_use]
    pub const fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Create a clock from a timezone-database name.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::UnknownTimezone`] when the name does not resolve.
    pub fn from_name(name: &str) -> Result<Self, ClockError> {
        let tz: Tz = name.parse().map_err(|_| ClockError::UnknownTimezone {
            name: name.to_string(),
        })?;
        Ok(Self::new(tz))
    }

    /// The timezone this clock is anchored to.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.tz
    }

    /// Unix timestamp of local midnight for the day containing `timestamp`.
    ///
    /// Ambiguous local midnights (the repeated hour of a fall-back
    /// transition) resolve to the earliest mapping; a skipped midnight
    /// (possible in timezones that spring forward at 00:00) resolves to the
    /// first valid instant afterwards. Timestamps outside chrono's
    /// representable range are returned unchanged; callers gate such inputs
    /// through the admission sanity window before they reach daily math.
    #[must_use]
    pub fn day_start(&self, timestamp: i64) -> i64 {
        let Some(utc) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
            return timestamp;
        };
        let local_day = utc.with_timezone(&self.tz).date_naive();
        let Some(midnight) = local_day.and_hms_opt(0, 0, 0) else {
            return timestamp;
        };
        match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(dt) => dt.timestamp(),
            LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
            LocalResult::None => (midnight + Duration::hours(1))
                .and_local_timezone(self.tz)
                .earliest()
                .map_or(timestamp, |dt| dt.timestamp()),
        }
    }

    /// True when the day boundary has rolled over since `last_reset_day`.
    #[must_use]
    pub fn needs_reset(&self, last_reset_day: i64, now: i64) -> bool {
        self.day_start(now) != last_reset_day
    }

    /// True when both instants fall on the same reference-timezone day.
    #[must_use]
    pub fn is_same_day(&self, a: i64, b: i64) -> bool {
        self.day_start(a) == self.day_start(b)
    }
}

impl Default for DayClock {
    fn default() -> Self {
        Self::new(chrono_tz::America::Los_Angeles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-03-09 is the US spring-forward date: the Pacific day is 23 hours.
    // Midnight PST = 2025-03-09T08:00:00Z.
    const SPRING_MIDNIGHT: i64 = 1_741_507_200;
    // 2025-11-02 is the fall-back date: the Pacific day is 25 hours.
    // Midnight PDT = 2025-11-02T07:00:00Z.
    const FALL_MIDNIGHT: i64 = 1_762_066_800;

    #[test]
    fn day_start_is_idempotent() {
        let clock = DayClock::default();
        let start = clock.day_start(1_741_546_800);
        assert_eq!(clock.day_start(start), start);
    }

    #[test]
    fn spring_forward_day_is_23_hours() {
        let clock = DayClock::default();
        // Noon PDT on the transition day still maps back to the PST midnight.
        let noon_pdt = 1_741_546_800; // 2025-03-09T19:00:00Z
        assert_eq!(clock.day_start(noon_pdt), SPRING_MIDNIGHT);

        let next_midnight = clock.day_start(SPRING_MIDNIGHT + 23 * 3600);
        assert_eq!(next_midnight - SPRING_MIDNIGHT, 23 * 3600);
    }

    #[test]
    fn fall_back_day_is_25_hours() {
        let clock = DayClock::default();
        // Both occurrences of 01:30 local time belong to the same day.
        let first_0130 = FALL_MIDNIGHT + 90 * 60; // 01:30 PDT
        let second_0130 = FALL_MIDNIGHT + 150 * 60; // 01:30 PST
        assert_eq!(clock.day_start(first_0130), FALL_MIDNIGHT);
        assert_eq!(clock.day_start(second_0130), FALL_MIDNIGHT);

        // 23:59 PST on the transition day is still the same day.
        let late = FALL_MIDNIGHT + 25 * 3600 - 60;
        assert_eq!(clock.day_start(late), FALL_MIDNIGHT);

        // The next boundary is 25 hours after the previous one.
        let next_midnight = clock.day_start(FALL_MIDNIGHT + 25 * 3600);
        assert_eq!(next_midnight - FALL_MIDNIGHT, 25 * 3600);
    }

    #[test]
    fn needs_reset_only_across_boundary() {
        let clock = DayClock::default();
        let day = clock.day_start(SPRING_MIDNIGHT + 3600);
        assert!(!clock.needs_reset(day, SPRING_MIDNIGHT + 2 * 3600));
        assert!(clock.needs_reset(day, SPRING_MIDNIGHT + 24 * 3600));
    }

    #[test]
    fn same_day_comparison() {
        let clock = DayClock::default();
        assert!(clock.is_same_day(FALL_MIDNIGHT + 60, FALL_MIDNIGHT + 24 * 3600));
        assert!(!clock.is_same_day(FALL_MIDNIGHT, FALL_MIDNIGHT + 26 * 3600));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(matches!(
            DayClock::from_name("America/Nowhere"),
            Err(ClockError::UnknownTimezone { .. })
        ));
        assert!(DayClock::from_name(DEFAULT_TIMEZONE).is_ok());
    }

    #[test]
    fn manual_time_source_steps() {
        let source = ManualTimeSource::new(100);
        assert_eq!(source.now_unix(), 100);
        source.advance(50);
        assert_eq!(source.now_unix(), 150);
        source.set(7);
        assert_eq!(source.now_unix(), 7);
    }
}

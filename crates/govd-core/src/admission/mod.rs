//! Per-admin daily admission ledger.
//!
//! The tracker answers one question for the request lifecycle: may this admin
//! open a new update request right now? The rules stack, and every rule that
//! cannot be evaluated denies:
//!
//! 1. The admin id must be a well-formed UUID v4 ([`crate::identity`]).
//! 2. The timestamp must fall inside a sanity window around the wall clock,
//!    rejecting clock skew and garbage input.
//! 3. One request per admin per reference-timezone day.
//! 4. No request from *any* admin may already exist in the current day
//!    window. Even if a single admin's daily rule were bypassed, overlapping
//!    requests across admins are still refused. The scan is linear; admin
//!    populations are tens, not millions.
//! 5. An admin with an active, non-expired request cannot stack another.
//!
//! Denials are ordinary outcomes, not errors: [`evaluate`] returns an
//! [`AdmissionDecision`] carrying a stable deny-reason string that the
//! operator surface can relay verbatim.
//!
//! # Thread Safety
//!
//! All record mutation happens under a single `Mutex` scoped to the tracker,
//! so the `(requests_today, day_start_time)` pair is never observed
//! mid-update. Lock poisoning is recovered into the inner state; the ledger
//! holds plain counters and stays coherent even if a holder panicked.
//!
//! [`evaluate`]: AdmissionTracker::evaluate

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::clock::{DayClock, TimeSource};
use crate::identity::AdminId;

#[cfg(test)]
mod tests;

/// Default expiration window for an active request, in minutes.
pub const DEFAULT_EXPIRATION_MINUTES: u32 = 10;

/// Sanity window for incoming timestamps: ±1 year of wall-clock time.
pub const TIMESTAMP_SANITY_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;

/// Stable deny reason for a malformed admin id.
pub const DENY_REASON_INVALID_ADMIN_ID: &str = "admission_invalid_admin_id";
/// Stable deny reason for a timestamp outside the sanity window.
pub const DENY_REASON_TIMESTAMP_OUT_OF_RANGE: &str = "admission_timestamp_out_of_range";
/// Stable deny reason when the admin already requested today.
pub const DENY_REASON_DAILY_LIMIT: &str = "admission_daily_limit_reached";
/// Stable deny reason when another request exists in the current day window.
pub const DENY_REASON_OVERLAPPING_REQUEST: &str = "admission_overlapping_request";
/// Stable deny reason when the admin holds an active, non-expired request.
pub const DENY_REASON_ACTIVE_REQUEST: &str = "admission_active_request_pending";

/// True when a request recorded at `request_timestamp` has expired by `now`.
///
/// Non-positive timestamps are treated as already expired; a record that
/// never carried a real time must not pin an active-request slot forever.
#[must_use]
pub fn is_request_expired(request_timestamp: i64, now: i64, expiration_minutes: u32) -> bool {
    if request_timestamp <= 0 || now <= 0 {
        return true;
    }
    now > request_timestamp + i64::from(expiration_minutes) * 60
}

/// Admission verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionVerdict {
    /// The admin may open a request now.
    Allow,
    /// The admin may not; see the deny reason.
    Deny,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    /// Whether the request is admitted.
    pub verdict: AdmissionVerdict,
    /// Stable deny reason when the verdict is [`AdmissionVerdict::Deny`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<&'static str>,
}

impl AdmissionDecision {
    const fn allow() -> Self {
        Self {
            verdict: AdmissionVerdict::Allow,
            deny_reason: None,
        }
    }

    const fn deny(reason: &'static str) -> Self {
        Self {
            verdict: AdmissionVerdict::Deny,
            deny_reason: Some(reason),
        }
    }

    /// True when the verdict is [`AdmissionVerdict::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.verdict == AdmissionVerdict::Allow
    }
}

/// Ledger entry for one admin. Created on first request, never deleted,
/// logically reset at each day boundary.
#[derive(Debug, Clone, Serialize)]
pub struct AdminRecord {
    /// The admin this record belongs to.
    pub admin_id: AdminId,
    /// Requests recorded in the day starting at `day_start_time`.
    pub requests_today: u32,
    /// Unix timestamp of the most recent recorded request.
    pub last_request_time: i64,
    /// Day boundary this record last observed.
    pub day_start_time: i64,
    /// True from request creation until resolution or expiry.
    pub has_active_request: bool,
}

impl AdminRecord {
    fn new(admin_id: AdminId) -> Self {
        Self {
            admin_id,
            requests_today: 0,
            last_request_time: 0,
            day_start_time: 0,
            has_active_request: false,
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    /// Minutes before an active request expires.
    pub expiration_minutes: u32,
    /// Half-width of the timestamp sanity window, in seconds.
    pub sanity_window_secs: i64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            expiration_minutes: DEFAULT_EXPIRATION_MINUTES,
            sanity_window_secs: TIMESTAMP_SANITY_WINDOW_SECS,
        }
    }
}

/// Read-only tracker snapshot for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    /// Number of admins that have ever recorded a request.
    pub tracked_admins: usize,
    /// Sum of `requests_today` over records from the current day.
    pub total_requests_today: u32,
    /// Records currently holding an active request flag.
    pub active_requests: usize,
}

struct TrackerState {
    records: HashMap<AdminId, AdminRecord>,
    last_reset_day: i64,
}

/// Per-admin, per-day request eligibility ledger.
pub struct AdmissionTracker {
    clock: DayClock,
    time: Arc<dyn TimeSource>,
    config: AdmissionConfig,
    state: Mutex<TrackerState>,
}

impl AdmissionTracker {
    /// Create a tracker over the given day clock and time source.
    #[must_use]
    pub fn new(clock: DayClock, time: Arc<dyn TimeSource>, config: AdmissionConfig) -> Self {
        Self {
            clock,
            time,
            config,
            state: Mutex::new(TrackerState {
                records: HashMap::new(),
                last_reset_day: 0,
            }),
        }
    }

    /// Evaluate whether `admin_id` may open a request at `now`.
    ///
    /// Applies a pending daily reset before reading any counter, so a stale
    /// ledger can never deny a fresh day.
    pub fn evaluate(&self, admin_id: &str, now: i64) -> AdmissionDecision {
        let Ok(admin) = AdminId::parse(admin_id) else {
            tracing::warn!(admin_id, "admission denied: malformed admin id");
            return AdmissionDecision::deny(DENY_REASON_INVALID_ADMIN_ID);
        };
        if !self.timestamp_in_range(now) {
            tracing::warn!(admin_id = %admin, now, "admission denied: timestamp outside sanity window");
            return AdmissionDecision::deny(DENY_REASON_TIMESTAMP_OUT_OF_RANGE);
        }

        let day_start = self.clock.day_start(now);
        let mut state = self.lock_state();

        if self.clock.needs_reset(state.last_reset_day, now) {
            Self::reset_records(&mut state.records);
            state.last_reset_day = day_start;
            tracing::info!(day_start, "admission ledger rolled over to a new day");
        }

        if let Some(record) = state.records.get(&admin) {
            if record.day_start_time == day_start && record.requests_today > 0 {
                tracing::warn!(admin_id = %admin, "admission denied: daily limit reached");
                return AdmissionDecision::deny(DENY_REASON_DAILY_LIMIT);
            }
        }

        let overlapping = state
            .records
            .values()
            .filter(|r| {
                r.day_start_time == day_start
                    && r.last_request_time >= day_start
                    && r.last_request_time <= now
            })
            .count();
        if overlapping > 0 {
            tracing::warn!(
                admin_id = %admin,
                overlapping,
                "admission denied: overlapping request in current day window"
            );
            return AdmissionDecision::deny(DENY_REASON_OVERLAPPING_REQUEST);
        }

        if let Some(record) = state.records.get(&admin) {
            if record.has_active_request
                && !is_request_expired(record.last_request_time, now, self.config.expiration_minutes)
            {
                tracing::warn!(admin_id = %admin, "admission denied: active request pending");
                return AdmissionDecision::deny(DENY_REASON_ACTIVE_REQUEST);
            }
        }

        AdmissionDecision::allow()
    }

    /// Convenience form of [`evaluate`](Self::evaluate).
    #[must_use]
    pub fn can_make_request(&self, admin_id: &str, now: i64) -> bool {
        self.evaluate(admin_id, now).is_allowed()
    }

    /// Record a request for `admin_id` at `now`. No-op on invalid input.
    pub fn record_request(&self, admin_id: &str, now: i64) {
        let Ok(admin) = AdminId::parse(admin_id) else {
            tracing::warn!(admin_id, "ignoring record_request with malformed admin id");
            return;
        };
        if !self.timestamp_in_range(now) {
            tracing::warn!(admin_id = %admin, now, "ignoring record_request with out-of-range timestamp");
            return;
        }

        let day_start = self.clock.day_start(now);
        let mut state = self.lock_state();
        let record = state
            .records
            .entry(admin)
            .or_insert_with(|| AdminRecord::new(admin));

        // Day-boundary check before touching the counter: a record carried
        // over from a previous day restarts at zero.
        if record.day_start_time != day_start {
            record.requests_today = 0;
            record.day_start_time = day_start;
        }
        record.last_request_time = now;
        record.has_active_request = true;
        record.requests_today += 1;

        tracing::info!(
            admin_id = %admin,
            now,
            requests_today = record.requests_today,
            "recorded admin update request"
        );
    }

    /// True when a request stamped `request_timestamp` is expired at `now`,
    /// under this tracker's configured window.
    #[must_use]
    pub fn request_expired(&self, request_timestamp: i64, now: i64) -> bool {
        is_request_expired(request_timestamp, now, self.config.expiration_minutes)
    }

    /// Clear the active flag on every record whose request has expired.
    /// Returns the number of records cleared. Counters are untouched.
    pub fn cleanup_expired_requests(&self, now: i64) -> usize {
        let mut state = self.lock_state();
        let expiration_minutes = self.config.expiration_minutes;
        let mut cleared = 0;
        for record in state.records.values_mut() {
            if record.has_active_request
                && is_request_expired(record.last_request_time, now, expiration_minutes)
            {
                record.has_active_request = false;
                cleared += 1;
                tracing::debug!(admin_id = %record.admin_id, "expired active request");
            }
        }
        if cleared > 0 {
            tracing::info!(cleared, "cleaned up expired admin requests");
        }
        cleared
    }

    /// Zero every record's daily counter and active flag.
    ///
    /// Idempotent: a second call on an already-reset ledger changes nothing.
    pub fn reset_daily(&self) {
        let now = self.time.now_unix();
        let mut state = self.lock_state();
        Self::reset_records(&mut state.records);
        state.last_reset_day = self.clock.day_start(now);
        tracing::info!(day_start = state.last_reset_day, "admission ledger reset");
    }

    /// Sum of `requests_today` across records from the current day.
    ///
    /// Side-effect-free: records from a stale day are excluded, not lazily
    /// reset, so this read never mutates the ledger.
    #[must_use]
    pub fn get_total_requests_today(&self, now: i64) -> u32 {
        let day_start = self.clock.day_start(now);
        let state = self.lock_state();
        state
            .records
            .values()
            .filter(|r| r.day_start_time == day_start)
            .map(|r| r.requests_today)
            .sum()
    }

    /// This admin's recorded request count for the current day.
    #[must_use]
    pub fn admin_request_count_today(&self, admin_id: &str, now: i64) -> u32 {
        let Ok(admin) = AdminId::parse(admin_id) else {
            return 0;
        };
        let day_start = self.clock.day_start(now);
        let state = self.lock_state();
        state
            .records
            .get(&admin)
            .filter(|r| r.day_start_time == day_start)
            .map_or(0, |r| r.requests_today)
    }

    /// Snapshot of every ledger record.
    #[must_use]
    pub fn all_admin_stats(&self) -> Vec<AdminRecord> {
        let state = self.lock_state();
        let mut records: Vec<AdminRecord> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.admin_id.cmp(&b.admin_id));
        records
    }

    /// Aggregate snapshot for the operator surface.
    #[must_use]
    pub fn stats(&self, now: i64) -> TrackerStats {
        let day_start = self.clock.day_start(now);
        let state = self.lock_state();
        TrackerStats {
            tracked_admins: state.records.len(),
            total_requests_today: state
                .records
                .values()
                .filter(|r| r.day_start_time == day_start)
                .map(|r| r.requests_today)
                .sum(),
            active_requests: state
                .records
                .values()
                .filter(|r| r.has_active_request)
                .count(),
        }
    }

    /// The day clock shared with the rest of the core.
    #[must_use]
    pub const fn day_clock(&self) -> DayClock {
        self.clock
    }

    fn timestamp_in_range(&self, timestamp: i64) -> bool {
        let wall = self.time.now_unix();
        timestamp > wall - self.config.sanity_window_secs
            && timestamp < wall + self.config.sanity_window_secs
    }

    fn reset_records(records: &mut HashMap<AdminId, AdminRecord>) {
        for record in records.values_mut() {
            record.requests_today = 0;
            record.has_active_request = false;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

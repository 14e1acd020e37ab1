//! Tests for the admission ledger.
//!
//! Timestamps below are real Pacific-timezone instants so the daily rules are
//! exercised against the same day-boundary math production uses:
//! `DAY1_NOON` is 2025-06-10 12:00 PDT, `DAY1_START` its local midnight.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use super::*;
use crate::clock::{DayClock, ManualTimeSource};

const ADMIN_A: &str = "0a8ccafe-6db6-4f2f-8f53-1c54412c4c64";
const ADMIN_B: &str = "6e5de01e-04a9-4098-9a6d-6df44ae54a8a";
const ADMIN_C: &str = "f0b2e6a1-9c3d-4e5f-a1b2-c3d4e5f6a7b8";

/// 2025-06-10T19:00:00Z, noon PDT.
const DAY1_NOON: i64 = 1_749_582_000;
/// 2025-06-10T07:00:00Z, midnight PDT.
const DAY1_START: i64 = 1_749_538_800;

fn tracker_at(now: i64) -> (AdmissionTracker, Arc<ManualTimeSource>) {
    let time = ManualTimeSource::shared(now);
    let tracker = AdmissionTracker::new(
        DayClock::default(),
        Arc::clone(&time) as Arc<dyn crate::clock::TimeSource>,
        AdmissionConfig::default(),
    );
    (tracker, time)
}

#[test]
fn first_request_of_the_day_is_admitted() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    assert!(tracker.can_make_request(ADMIN_A, DAY1_NOON));
}

#[test]
fn second_request_same_day_is_denied() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    assert!(tracker.can_make_request(ADMIN_A, DAY1_NOON));
    tracker.record_request(ADMIN_A, DAY1_NOON);

    let decision = tracker.evaluate(ADMIN_A, DAY1_NOON + 1);
    assert!(!decision.is_allowed());
    assert_eq!(decision.deny_reason, Some(DENY_REASON_DAILY_LIMIT));
}

#[test]
fn repeated_records_keep_denying_for_the_day() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    for i in 0..3 {
        tracker.record_request(ADMIN_A, DAY1_NOON + i);
    }
    assert_eq!(tracker.admin_request_count_today(ADMIN_A, DAY1_NOON + 10), 3);
    assert!(!tracker.can_make_request(ADMIN_A, DAY1_NOON + 3600));
}

#[test]
fn next_day_is_admitted_via_lazy_reset() {
    let (tracker, time) = tracker_at(DAY1_NOON);
    tracker.record_request(ADMIN_A, DAY1_NOON);
    assert!(!tracker.can_make_request(ADMIN_A, DAY1_NOON + 60));

    let next_day = DAY1_NOON + 24 * 3600;
    time.set(next_day);
    assert!(tracker.can_make_request(ADMIN_A, next_day));
}

#[test]
fn overlapping_request_from_another_admin_is_denied() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    tracker.record_request(ADMIN_A, DAY1_NOON);

    let decision = tracker.evaluate(ADMIN_B, DAY1_NOON + 120);
    assert!(!decision.is_allowed());
    assert_eq!(decision.deny_reason, Some(DENY_REASON_OVERLAPPING_REQUEST));
}

#[test]
fn active_request_from_previous_day_blocks_until_expired() {
    // Roll the ledger to "today" first so the lazy reset has already run,
    // then backdate a record to just before midnight. The daily rule no
    // longer applies to it, but the active-request rule still must.
    let shortly_after_midnight = DAY1_START + 5 * 60;
    let (tracker, _) = tracker_at(shortly_after_midnight);
    assert!(tracker.can_make_request(ADMIN_B, shortly_after_midnight));

    let before_midnight = DAY1_START - 2 * 60;
    tracker.record_request(ADMIN_A, before_midnight);

    let decision = tracker.evaluate(ADMIN_A, shortly_after_midnight);
    assert!(!decision.is_allowed());
    assert_eq!(decision.deny_reason, Some(DENY_REASON_ACTIVE_REQUEST));

    // Eleven minutes after the request it is expired and no longer blocks.
    let later = before_midnight + 11 * 60;
    assert!(tracker.can_make_request(ADMIN_A, later));
}

#[test]
fn malformed_admin_id_fails_closed() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    let decision = tracker.evaluate("not-a-uuid", DAY1_NOON);
    assert_eq!(decision.deny_reason, Some(DENY_REASON_INVALID_ADMIN_ID));

    // record_request with the same input is a no-op.
    tracker.record_request("not-a-uuid", DAY1_NOON);
    assert!(tracker.all_admin_stats().is_empty());
}

#[test]
fn out_of_range_timestamp_fails_closed() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    let two_years = 2 * 365 * 24 * 3600;

    let decision = tracker.evaluate(ADMIN_A, DAY1_NOON + two_years);
    assert_eq!(
        decision.deny_reason,
        Some(DENY_REASON_TIMESTAMP_OUT_OF_RANGE)
    );

    tracker.record_request(ADMIN_A, DAY1_NOON - two_years);
    assert!(tracker.all_admin_stats().is_empty());
}

#[test]
fn cleanup_clears_only_expired_active_flags() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    tracker.record_request(ADMIN_A, DAY1_NOON);

    // Five minutes in: not expired, nothing to clean.
    assert_eq!(tracker.cleanup_expired_requests(DAY1_NOON + 5 * 60), 0);
    assert!(tracker.all_admin_stats()[0].has_active_request);

    // Eleven minutes in: expired, flag cleared, counter untouched.
    assert_eq!(tracker.cleanup_expired_requests(DAY1_NOON + 11 * 60), 1);
    let stats = tracker.all_admin_stats();
    assert!(!stats[0].has_active_request);
    assert_eq!(stats[0].requests_today, 1);
}

#[test]
fn reset_daily_is_idempotent() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    tracker.record_request(ADMIN_A, DAY1_NOON);
    tracker.record_request(ADMIN_B, DAY1_NOON + 1);

    tracker.reset_daily();
    let first = format!("{:?}", tracker.all_admin_stats());
    tracker.reset_daily();
    let second = format!("{:?}", tracker.all_admin_stats());

    assert_eq!(first, second);
    assert_eq!(tracker.get_total_requests_today(DAY1_NOON), 0);
}

#[test]
fn totals_exclude_records_from_stale_days() {
    let (tracker, time) = tracker_at(DAY1_NOON);
    tracker.record_request(ADMIN_A, DAY1_NOON);
    assert_eq!(tracker.get_total_requests_today(DAY1_NOON), 1);

    let next_day = DAY1_NOON + 24 * 3600;
    time.set(next_day);
    // The read is side-effect-free: yesterday's record is excluded without
    // being reset.
    assert_eq!(tracker.get_total_requests_today(next_day), 0);
    assert_eq!(tracker.all_admin_stats()[0].requests_today, 1);
}

#[test]
fn stats_snapshot_counts_active_and_daily() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    tracker.record_request(ADMIN_A, DAY1_NOON);
    tracker.record_request(ADMIN_C, DAY1_NOON + 5);

    let stats = tracker.stats(DAY1_NOON + 10);
    assert_eq!(stats.tracked_admins, 2);
    assert_eq!(stats.total_requests_today, 2);
    assert_eq!(stats.active_requests, 2);
}

#[test]
fn expired_request_with_non_positive_timestamp() {
    assert!(is_request_expired(0, DAY1_NOON, 10));
    assert!(is_request_expired(-5, DAY1_NOON, 10));
    assert!(is_request_expired(DAY1_NOON, 0, 10));
}

#[test]
fn concurrent_records_keep_the_ledger_coherent() {
    let (tracker, _) = tracker_at(DAY1_NOON);
    let tracker = Arc::new(tracker);
    let ids = [ADMIN_A, ADMIN_B, ADMIN_C];

    let handles: Vec<_> = ids
        .iter()
        .map(|id| {
            let tracker = Arc::clone(&tracker);
            let id = (*id).to_string();
            thread::spawn(move || {
                for i in 0..50 {
                    tracker.record_request(&id, DAY1_NOON + i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tracker.get_total_requests_today(DAY1_NOON + 60), 150);
    for record in tracker.all_admin_stats() {
        assert_eq!(record.requests_today, 50);
    }
}

proptest! {
    /// Once expired, a request stays expired for every later instant.
    #[test]
    fn expiration_is_monotonic(
        request_ts in 1i64..2_000_000_000,
        delta in 0i64..100_000,
        extra in 0i64..100_000,
        minutes in 1u32..120,
    ) {
        let now = request_ts + delta;
        if is_request_expired(request_ts, now, minutes) {
            prop_assert!(is_request_expired(request_ts, now + extra, minutes));
        }
    }

    /// The expiration boundary is exact: one second past the window flips it.
    #[test]
    fn expiration_boundary_is_exact(request_ts in 1i64..2_000_000_000, minutes in 1u32..120) {
        let window = i64::from(minutes) * 60;
        prop_assert!(!is_request_expired(request_ts, request_ts + window, minutes));
        prop_assert!(is_request_expired(request_ts, request_ts + window + 1, minutes));
    }
}

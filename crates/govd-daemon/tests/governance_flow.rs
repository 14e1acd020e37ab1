//! End-to-end governance flow tests.
//!
//! These tests run the full service — admission, lifecycle, queue, and the
//! executor boundary — with a recording executor and a hand-driven clock.
//! Background tickers are exercised where the flow depends on them; approval
//! paths are expected to drive the queue without waiting for a tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use govd_core::clock::ManualTimeSource;
use govd_core::queue::RequestKind;
use govd_core::{
    GovernanceConfig, LifecycleError, OwnerDecision, QueuedRequest, RequestStatus, TimeSource,
    Vote,
};
use govd_daemon::executor::{ExecutionError, UpdateExecutor};
use govd_daemon::service::GovernanceService;
use uuid::Uuid;

const OWNER: &str = "f0b2e6a1-9c3d-4e5f-a1b2-c3d4e5f6a7b8";
const ADMIN_A: &str = "0a8ccafe-6db6-4f2f-8f53-1c54412c4c64";
const ADMIN_B: &str = "6e5de01e-04a9-4098-9a6d-6df44ae54a8a";
const ADMIN_C: &str = "9cd1e4aa-20cf-4f10-b77c-d3ee2c79cbcd";

/// 2025-06-10T19:00:00Z, noon PDT.
const T0: i64 = 1_749_582_000;

/// Executor that records every request it sees and can be told to fail.
#[derive(Default)]
struct RecordingExecutor {
    executed: Mutex<Vec<Uuid>>,
    fail: AtomicBool,
}

impl RecordingExecutor {
    fn executed_ids(&self) -> Vec<Uuid> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl UpdateExecutor for RecordingExecutor {
    async fn execute(&self, request: &QueuedRequest) -> Result<(), ExecutionError> {
        self.executed.lock().unwrap().push(request.id);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExecutionError::Failed {
                reason: "induced failure".to_string(),
            });
        }
        Ok(())
    }
}

struct Harness {
    service: GovernanceService,
    executor: Arc<RecordingExecutor>,
    time: Arc<ManualTimeSource>,
}

fn harness_at(now: i64) -> Harness {
    let config = GovernanceConfig {
        cleanup_interval_secs: 1,
        ..GovernanceConfig::default()
    };
    let executor = Arc::new(RecordingExecutor::default());
    let time = ManualTimeSource::shared(now);
    let service = GovernanceService::new(
        config,
        Arc::clone(&executor) as Arc<dyn UpdateExecutor>,
        Arc::clone(&time) as Arc<dyn govd_core::TimeSource>,
    )
    .unwrap();
    Harness {
        service,
        executor,
        time,
    }
}

fn payload() -> serde_json::Value {
    serde_json::json!({"action": "daily_update", "source": "test"})
}

#[tokio::test(flavor = "multi_thread")]
async fn owner_approval_executes_exactly_once() {
    let hx = harness_at(T0);
    let id = hx
        .service
        .create_request(ADMIN_A, "alice", payload())
        .unwrap();

    let status = hx
        .service
        .owner_decide(id, OwnerDecision::Approve)
        .await
        .unwrap();
    assert_eq!(status, RequestStatus::Approved);

    // Approval drives the queue opportunistically; no ticker is running.
    assert_eq!(hx.executor.executed_ids().len(), 1);
    let stats = hx.service.stats();
    assert_eq!(stats.queue.total_executed, 1);
    assert_eq!(stats.queue.queued, 0);
    assert_eq!(stats.lifecycle.approved, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn democratic_quorum_executes_once() {
    let hx = harness_at(T0);
    let id = hx
        .service
        .create_request(ADMIN_A, "alice", payload())
        .unwrap();

    hx.time.advance(10);
    assert_eq!(
        hx.service
            .cast_vote(id, ADMIN_A, Vote::Approve, 4)
            .await
            .unwrap(),
        RequestStatus::Pending
    );
    hx.time.advance(10);
    assert_eq!(
        hx.service
            .cast_vote(id, ADMIN_B, Vote::Approve, 4)
            .await
            .unwrap(),
        RequestStatus::Pending
    );
    assert!(hx.executor.executed_ids().is_empty());

    hx.time.advance(10);
    assert_eq!(
        hx.service
            .cast_vote(id, ADMIN_C, Vote::Approve, 4)
            .await
            .unwrap(),
        RequestStatus::Approved
    );

    assert_eq!(hx.executor.executed_ids().len(), 1);
    assert_eq!(hx.service.stats().queue.total_executed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn executor_failure_is_counted_and_does_not_wedge_the_queue() {
    let hx = harness_at(T0);
    hx.executor.fail.store(true, Ordering::SeqCst);

    let id = hx
        .service
        .create_request(ADMIN_A, "alice", payload())
        .unwrap();
    hx.service
        .owner_decide(id, OwnerDecision::Approve)
        .await
        .unwrap();

    let stats = hx.service.stats();
    assert_eq!(stats.queue.total_failed, 1);
    assert_eq!(stats.queue.queued, 0);
    assert!(!stats.queue.is_processing);
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_ticker_picks_up_directly_enqueued_items() {
    let hx = harness_at(T0);
    hx.service.start();

    // Hand an item straight to the queue, bypassing the approval paths that
    // would drive processing themselves.
    hx.service
        .queue()
        .enqueue(QueuedRequest::new(
            OWNER.parse().unwrap(),
            "owner",
            RequestKind::Owner,
            payload(),
            T0,
        ))
        .unwrap();

    let mut executed = 0;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        executed = hx.executor.executed_ids().len();
        if executed == 1 {
            break;
        }
    }
    assert_eq!(executed, 1);

    hx.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_request_same_day_is_denied_next_day_allowed() {
    let hx = harness_at(T0);
    hx.service
        .create_request(ADMIN_A, "alice", payload())
        .unwrap();

    hx.time.advance(60);
    let err = hx
        .service
        .create_request(ADMIN_A, "alice", payload())
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AdmissionDenied { .. }));

    // Across the Pacific day boundary the admission ledger resets lazily.
    hx.time.set(T0 + 24 * 3600);
    hx.service
        .create_request(ADMIN_A, "alice", payload())
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sweep_expires_requests_and_admissions() {
    let hx = harness_at(T0);
    let id = hx
        .service
        .create_request(ADMIN_A, "alice", payload())
        .unwrap();

    hx.time.advance(11 * 60);
    hx.service.sweep_now();

    let request = hx
        .service
        .lifecycle()
        .get_request(id, hx.time.now_unix())
        .unwrap();
    assert_eq!(request.status, RequestStatus::Expired);
    assert_eq!(hx.service.stats().admission.active_requests, 0);

    // A vote against the expired request is refused.
    let err = hx
        .service
        .cast_vote(id, ADMIN_B, Vote::Approve, 4)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::RequestTerminal { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_background_tasks() {
    let hx = harness_at(T0);
    hx.service.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    hx.service.shutdown().await;

    // A second shutdown is a no-op rather than a hang.
    hx.service.shutdown().await;
}

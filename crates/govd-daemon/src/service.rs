//! Governance service wiring.
//!
//! [`GovernanceService`] is the constructed, dependency-injected composition
//! root for the governance core: it owns the admission tracker, the
//! execution queue, and the request lifecycle, and runs the two background
//! tickers that drive them — the queue poll loop and the expiration/stale
//! sweep. The host application creates it, calls [`start`], and tears it
//! down with [`shutdown`]; nothing in this crate lives in global state.
//!
//! # Task Model
//!
//! ```text
//! GovernanceService
//!     ├── poll task     — every poll_interval_ms: claim + execute queued item
//!     └── cleanup task  — every cleanup_interval_secs: expire admissions,
//!                         expire pending requests, drop stale queue items
//! ```
//!
//! Both tasks observe a shared shutdown flag and exit at their next tick.
//! The executor runs outside every governance lock: the queue hands the item
//! out via `try_begin`, the await happens lock-free, and `finish` records
//! the outcome.
//!
//! Approval paths also drive the queue opportunistically, so an approved
//! request does not wait for the next poll tick when the queue is idle.
//!
//! [`start`]: GovernanceService::start
//! [`shutdown`]: GovernanceService::shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use govd_core::admission::TrackerStats;
use govd_core::clock::TimeSource;
use govd_core::config::ConfigError;
use govd_core::lifecycle::LifecycleStats;
use govd_core::queue::QueueStats;
use govd_core::{
    AdmissionTracker, ExecutionOutcome, ExecutionQueue, GovernanceConfig, LifecycleError,
    OwnerDecision, RequestLifecycle, RequestStatus, Vote,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::executor::UpdateExecutor;

/// Aggregate read-only snapshot across all governance components.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Unix timestamp at which the service was constructed.
    pub started_at: i64,
    /// Admission ledger snapshot.
    pub admission: TrackerStats,
    /// Execution queue snapshot.
    pub queue: QueueStats,
    /// Request lifecycle snapshot.
    pub lifecycle: LifecycleStats,
}

/// Composition root for the governance core.
pub struct GovernanceService {
    tracker: Arc<AdmissionTracker>,
    queue: Arc<ExecutionQueue>,
    lifecycle: Arc<RequestLifecycle>,
    executor: Arc<dyn UpdateExecutor>,
    time: Arc<dyn TimeSource>,
    config: GovernanceConfig,
    shutdown: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: i64,
}

impl GovernanceService {
    /// Construct the service from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration fails validation.
    pub fn new(
        config: GovernanceConfig,
        executor: Arc<dyn UpdateExecutor>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = config
            .day_clock()
            .map_err(|err| ConfigError::Validation(err.to_string()))?;

        let tracker = Arc::new(AdmissionTracker::new(
            clock,
            Arc::clone(&time),
            config.admission(),
        ));
        let queue = Arc::new(ExecutionQueue::new(config.queue));
        let lifecycle = Arc::new(RequestLifecycle::new(
            Arc::clone(&tracker),
            Arc::clone(&queue),
            clock,
            config.lifecycle(),
        ));

        let started_at = time.now_unix();
        Ok(Self {
            tracker,
            queue,
            lifecycle,
            executor,
            time,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            started_at,
        })
    }

    /// Spawn the queue poll task and the cleanup task.
    ///
    /// Idempotent only in the sense that calling it twice spawns a second
    /// set of tickers; hosts call it once after construction.
    pub fn start(&self) {
        let poll_interval = Duration::from_millis(self.config.queue.poll_interval_ms);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));

        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);
        let time = Arc::clone(&self.time);
        let shutdown = Arc::clone(&self.shutdown);
        let poll_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                drive_queue(&queue, executor.as_ref(), time.as_ref()).await;
            }
            tracing::debug!("queue poll task stopped");
        });

        let tracker = Arc::clone(&self.tracker);
        let lifecycle = Arc::clone(&self.lifecycle);
        let queue = Arc::clone(&self.queue);
        let time = Arc::clone(&self.time);
        let shutdown = Arc::clone(&self.shutdown);
        let cleanup_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let now = time.now_unix();
                tracker.cleanup_expired_requests(now);
                lifecycle.cleanup_expired(now);
                queue.cleanup_stale_requests(now);
            }
            tracing::debug!("cleanup task stopped");
        });

        let mut tasks = self.lock_tasks();
        tasks.push(poll_task);
        tasks.push(cleanup_task);
        tracing::info!(
            poll_interval_ms = self.config.queue.poll_interval_ms,
            cleanup_interval_secs = self.config.cleanup_interval_secs,
            "governance service started"
        );
    }

    /// Signal the background tasks to stop and wait for them.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.lock_tasks();
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "governance task join failed");
            }
        }
        tracing::info!("governance service stopped");
    }

    /// Open a new update request for `requester_id`.
    ///
    /// # Errors
    ///
    /// Propagates [`LifecycleError`] from the lifecycle; admission denials
    /// arrive as [`LifecycleError::AdmissionDenied`].
    pub fn create_request(
        &self,
        requester_id: &str,
        requester_name: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, LifecycleError> {
        self.lifecycle
            .create_request(requester_id, requester_name, payload, self.time.now_unix())
    }

    /// Apply the owner's decision, then drive the queue if approval
    /// produced work.
    ///
    /// # Errors
    ///
    /// Propagates [`LifecycleError`]; a [`LifecycleError::QueueRejected`]
    /// leaves the request approved and retryable.
    pub async fn owner_decide(
        &self,
        request_id: Uuid,
        decision: OwnerDecision,
    ) -> Result<RequestStatus, LifecycleError> {
        let status = self
            .lifecycle
            .owner_decide(request_id, decision, self.time.now_unix())?;
        if status == RequestStatus::Approved {
            self.process_now().await;
        }
        Ok(status)
    }

    /// Record a vote, then drive the queue if quorum approval produced work.
    ///
    /// # Errors
    ///
    /// Propagates [`LifecycleError`].
    pub async fn cast_vote(
        &self,
        request_id: Uuid,
        voter_id: &str,
        vote: Vote,
        total_admins: usize,
    ) -> Result<RequestStatus, LifecycleError> {
        let status = self.lifecycle.cast_vote(
            request_id,
            voter_id,
            vote,
            total_admins,
            self.time.now_unix(),
        )?;
        if status == RequestStatus::Approved {
            self.process_now().await;
        }
        Ok(status)
    }

    /// Re-attempt the queue hand-off for an approved request, then drive
    /// the queue.
    ///
    /// # Errors
    ///
    /// Propagates [`LifecycleError`].
    pub async fn retry_enqueue(&self, request_id: Uuid) -> Result<(), LifecycleError> {
        self.lifecycle
            .retry_enqueue(request_id, self.time.now_unix())?;
        self.process_now().await;
        Ok(())
    }

    /// Drive one opportunistic processing pass.
    pub async fn process_now(&self) {
        drive_queue(&self.queue, self.executor.as_ref(), self.time.as_ref()).await;
    }

    /// Run one expiration/stale sweep outside the periodic ticker.
    pub fn sweep_now(&self) {
        let now = self.time.now_unix();
        self.tracker.cleanup_expired_requests(now);
        self.lifecycle.cleanup_expired(now);
        self.queue.cleanup_stale_requests(now);
    }

    /// Aggregate snapshot for the operator surface.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        let now = self.time.now_unix();
        ServiceStats {
            started_at: self.started_at,
            admission: self.tracker.stats(now),
            queue: self.queue.stats(),
            lifecycle: self.lifecycle.stats(now),
        }
    }

    /// The admission tracker, for hosts that surface its snapshots.
    #[must_use]
    pub fn tracker(&self) -> &AdmissionTracker {
        &self.tracker
    }

    /// The execution queue, for hosts that surface its snapshots.
    #[must_use]
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// The request lifecycle, for hosts that surface request state.
    #[must_use]
    pub fn lifecycle(&self) -> &RequestLifecycle {
        &self.lifecycle
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Claim and execute queued items until the queue is idle or empty.
///
/// The claim/finish split keeps every queue lock released across the
/// executor await; the in-flight flag guarantees a concurrent poll tick
/// cannot claim a second item.
async fn drive_queue(queue: &ExecutionQueue, executor: &dyn UpdateExecutor, time: &dyn TimeSource) {
    while let Some(request) = queue.try_begin() {
        let outcome = match executor.execute(&request).await {
            Ok(()) => ExecutionOutcome::Executed,
            Err(err) => {
                tracing::warn!(request_id = %request.id, error = %err, "update execution failed");
                ExecutionOutcome::Failed
            },
        };
        queue.finish(&request, outcome, time.now_unix());
    }
}

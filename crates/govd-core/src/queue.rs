//! Single-slot execution queue for approved update requests.
//!
//! The queue is the choke point that makes admin-triggered updates safe: it
//! holds at most one item (`max_queue_size`, 1 by default), so no request can
//! observe or interleave with another's partial execution. On top of the size
//! limit, burst detection rejects a request as rapid when the same requester
//! already has a queued item younger than `rapid_threshold_secs`, or when the
//! previous execution finished less than that threshold ago.
//!
//! Processing is split into two halves so the executor never runs under the
//! queue lock: [`try_begin`] atomically claims the head item (priority
//! descending, FIFO within equal priority) and sets the processing flag;
//! [`finish`] records the outcome and releases the flag. Both the poll ticker
//! and the opportunistic post-enqueue path go through the same pair, and the
//! flag makes the routine idempotent under concurrent invocation — two
//! callers can race [`try_begin`], but only one receives the item.
//!
//! Items that sit queued longer than `max_wait_time_ms` are dropped by
//! [`cleanup_stale_requests`]; a hung executor must not pin a slot forever.
//!
//! [`try_begin`]: ExecutionQueue::try_begin
//! [`finish`]: ExecutionQueue::finish
//! [`cleanup_stale_requests`]: ExecutionQueue::cleanup_stale_requests

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::identity::AdminId;

/// Default queue capacity. One slot: at most one update in flight, ever.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1;
/// Default burst-rejection threshold, in seconds.
pub const DEFAULT_RAPID_THRESHOLD_SECS: i64 = 5;
/// Default maximum time an item may wait in the queue, in milliseconds.
pub const DEFAULT_MAX_WAIT_TIME_MS: u64 = 60_000;
/// Default processing poll interval, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Priority assigned to owner-approved requests.
pub const OWNER_PRIORITY: u8 = 100;
/// Priority assigned to democratically-approved requests.
pub const DEMOCRATIC_PRIORITY: u8 = 50;

/// How a request earned its place in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Approved directly by the owner.
    Owner,
    /// Approved by admin vote quorum.
    Democratic,
}

impl RequestKind {
    /// Execution priority for this kind. Owner requests run first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Owner => OWNER_PRIORITY,
            Self::Democratic => DEMOCRATIC_PRIORITY,
        }
    }

    /// Stable string form for logs and stats.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Democratic => "democratic",
        }
    }
}

/// A request admitted to the execution queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedRequest {
    /// Unique id, generated at enqueue time.
    pub id: Uuid,
    /// Admin whose approval produced this item.
    pub requester_id: AdminId,
    /// Display name of the requester.
    pub requester_name: String,
    /// Unix timestamp at which the item was built for enqueueing.
    pub enqueued_at: i64,
    /// Approval path.
    pub kind: RequestKind,
    /// Derived execution priority.
    pub priority: u8,
    /// Opaque payload forwarded to the executor.
    pub payload: serde_json::Value,
}

impl QueuedRequest {
    /// Build a queue item for the given requester and approval path.
    #[must_use]
    pub fn new(
        requester_id: AdminId,
        requester_name: impl Into<String>,
        kind: RequestKind,
        payload: serde_json::Value,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id,
            requester_name: requester_name.into(),
            enqueued_at: now,
            kind,
            priority: kind.priority(),
            payload,
        }
    }
}

/// Why an enqueue attempt was refused. Expected outcomes, not faults; each
/// increments the rejection counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EnqueueRejection {
    /// The queue already holds its maximum number of items.
    #[error("execution queue is full ({max} slot)")]
    QueueFull {
        /// Configured capacity.
        max: usize,
    },

    /// The same requester already has a queued item younger than the
    /// rapid threshold.
    #[error("rapid request: requester {requester_id} enqueued {elapsed_secs}s ago")]
    RapidRequester {
        /// The offending requester.
        requester_id: AdminId,
        /// Seconds since their queued item was enqueued.
        elapsed_secs: i64,
    },

    /// The previous execution finished less than the rapid threshold ago.
    #[error("rapid request: last execution finished {elapsed_secs}s ago")]
    RapidReentry {
        /// Seconds since the last processed item.
        elapsed_secs: i64,
    },
}

/// Result of executing a dequeued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The executor reported success.
    Executed,
    /// The executor reported failure. The item is gone either way; the
    /// queue does not retry.
    Failed,
}

/// Queue tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued items. The governance design requires 1.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Burst-rejection threshold in seconds.
    #[serde(default = "default_rapid_threshold_secs")]
    pub rapid_threshold_secs: i64,
    /// Maximum queue wait before an item is dropped as stale, milliseconds.
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
    /// Processing poll interval, milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}
const fn default_rapid_threshold_secs() -> i64 {
    DEFAULT_RAPID_THRESHOLD_SECS
}
const fn default_max_wait_time_ms() -> u64 {
    DEFAULT_MAX_WAIT_TIME_MS
}
const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            rapid_threshold_secs: DEFAULT_RAPID_THRESHOLD_SECS,
            max_wait_time_ms: DEFAULT_MAX_WAIT_TIME_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Read-only queue snapshot for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Items currently queued.
    pub queued: usize,
    /// Whether an execution is in flight.
    pub is_processing: bool,
    /// Total accepted enqueues.
    pub total_enqueued: u64,
    /// Total rejected enqueues (full or rapid).
    pub total_rejected: u64,
    /// Total successful executions.
    pub total_executed: u64,
    /// Total failed executions.
    pub total_failed: u64,
    /// Total items dropped as stale.
    pub total_stale_dropped: u64,
    /// Unix timestamp of the most recently finished execution.
    pub last_processed_at: Option<i64>,
}

struct Slot {
    seq: u64,
    request: QueuedRequest,
}

struct QueueState {
    config: QueueConfig,
    items: Vec<Slot>,
    next_seq: u64,
    is_processing: bool,
    last_processed_at: Option<i64>,
    total_enqueued: u64,
    total_rejected: u64,
    total_executed: u64,
    total_failed: u64,
    total_stale_dropped: u64,
}

/// Single-slot, poll-driven execution serializer.
pub struct ExecutionQueue {
    state: Mutex<QueueState>,
}

impl ExecutionQueue {
    /// Create a queue with the given configuration.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                config,
                items: Vec::new(),
                next_seq: 0,
                is_processing: false,
                last_processed_at: None,
                total_enqueued: 0,
                total_rejected: 0,
                total_executed: 0,
                total_failed: 0,
                total_stale_dropped: 0,
            }),
        }
    }

    /// Attempt to admit a request to the queue.
    ///
    /// # Errors
    ///
    /// Returns an [`EnqueueRejection`] when the queue is full or burst
    /// detection fires; the rejection counter is incremented either way.
    pub fn enqueue(&self, request: QueuedRequest) -> Result<(), EnqueueRejection> {
        let mut state = self.lock_state();

        if state.items.len() >= state.config.max_queue_size {
            state.total_rejected += 1;
            let rejection = EnqueueRejection::QueueFull {
                max: state.config.max_queue_size,
            };
            tracing::warn!(requester_id = %request.requester_id, %rejection, "enqueue rejected");
            return Err(rejection);
        }

        let threshold = state.config.rapid_threshold_secs;
        let rapid_peer = state.items.iter().find_map(|s| {
            (s.request.requester_id == request.requester_id
                && request.enqueued_at - s.request.enqueued_at < threshold)
                .then_some(s.request.enqueued_at)
        });
        if let Some(peer_enqueued_at) = rapid_peer {
            let rejection = EnqueueRejection::RapidRequester {
                requester_id: request.requester_id,
                elapsed_secs: request.enqueued_at - peer_enqueued_at,
            };
            state.total_rejected += 1;
            tracing::warn!(requester_id = %request.requester_id, %rejection, "enqueue rejected");
            return Err(rejection);
        }

        if let Some(last) = state.last_processed_at {
            if request.enqueued_at - last < threshold {
                let rejection = EnqueueRejection::RapidReentry {
                    elapsed_secs: request.enqueued_at - last,
                };
                state.total_rejected += 1;
                tracing::warn!(requester_id = %request.requester_id, %rejection, "enqueue rejected");
                return Err(rejection);
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        tracing::info!(
            request_id = %request.id,
            requester_id = %request.requester_id,
            kind = request.kind.as_str(),
            priority = request.priority,
            "queued update request"
        );
        state.items.push(Slot { seq, request });
        state.total_enqueued += 1;
        Ok(())
    }

    /// Claim the highest-priority queued item for execution.
    ///
    /// Returns `None` when an execution is already in flight or the queue is
    /// empty. On success the processing flag is set; the caller must invoke
    /// [`finish`](Self::finish) exactly once with the outcome.
    pub fn try_begin(&self) -> Option<QueuedRequest> {
        let mut state = self.lock_state();
        if state.is_processing || state.items.is_empty() {
            return None;
        }
        // Priority descending, then FIFO by enqueue sequence for equal
        // priority.
        state
            .items
            .sort_by(|a, b| b.request.priority.cmp(&a.request.priority).then(a.seq.cmp(&b.seq)));
        let slot = state.items.remove(0);
        state.is_processing = true;
        tracing::debug!(request_id = %slot.request.id, "claimed request for execution");
        Some(slot.request)
    }

    /// Record the outcome of an execution begun with [`try_begin`](Self::try_begin).
    pub fn finish(&self, request: &QueuedRequest, outcome: ExecutionOutcome, now: i64) {
        let mut state = self.lock_state();
        state.is_processing = false;
        state.last_processed_at = Some(now);
        match outcome {
            ExecutionOutcome::Executed => {
                state.total_executed += 1;
                tracing::info!(request_id = %request.id, "update request executed");
            },
            ExecutionOutcome::Failed => {
                state.total_failed += 1;
                tracing::warn!(request_id = %request.id, "update request execution failed");
            },
        }
    }

    /// Drive one processing pass with a synchronous executor.
    ///
    /// Claims the head item (if idle and non-empty), runs `execute` with the
    /// queue lock released, and records the outcome. Returns the outcome, or
    /// `None` when there was nothing to do.
    pub fn process_next_with<F>(&self, now: i64, execute: F) -> Option<ExecutionOutcome>
    where
        F: FnOnce(&QueuedRequest) -> bool,
    {
        let request = self.try_begin()?;
        let outcome = if execute(&request) {
            ExecutionOutcome::Executed
        } else {
            ExecutionOutcome::Failed
        };
        self.finish(&request, outcome, now);
        Some(outcome)
    }

    /// Drop queued items older than the configured maximum wait time.
    /// Returns the number removed.
    pub fn cleanup_stale_requests(&self, now: i64) -> usize {
        let mut state = self.lock_state();
        let max_wait_secs = i64::try_from(state.config.max_wait_time_ms / 1000).unwrap_or(i64::MAX);
        let before = state.items.len();
        state.items.retain(|slot| {
            let stale = now - slot.request.enqueued_at > max_wait_secs;
            if stale {
                tracing::warn!(
                    request_id = %slot.request.id,
                    waited_secs = now - slot.request.enqueued_at,
                    "dropping stale queued request"
                );
            }
            !stale
        });
        let removed = before - state.items.len();
        state.total_stale_dropped += removed as u64;
        removed
    }

    /// Read-only counters and flags.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.lock_state();
        QueueStats {
            queued: state.items.len(),
            is_processing: state.is_processing,
            total_enqueued: state.total_enqueued,
            total_rejected: state.total_rejected,
            total_executed: state.total_executed,
            total_failed: state.total_failed,
            total_stale_dropped: state.total_stale_dropped,
            last_processed_at: state.last_processed_at,
        }
    }

    /// Defensive copy of the queued items.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        let state = self.lock_state();
        state.items.iter().map(|s| s.request.clone()).collect()
    }

    /// Remove all queued items. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut state = self.lock_state();
        let removed = state.items.len();
        state.items.clear();
        if removed > 0 {
            tracing::info!(removed, "cleared execution queue");
        }
        removed
    }

    /// Replace the queue tunables. Items already queued are unaffected.
    pub fn update_config(&self, config: QueueConfig) {
        let mut state = self.lock_state();
        state.config = config;
    }

    /// Current poll interval, for the processing ticker.
    #[must_use]
    pub fn poll_interval_ms(&self) -> u64 {
        self.lock_state().config.poll_interval_ms
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

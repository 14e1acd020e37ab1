//! Update-request lifecycle and voting state machine.
//!
//! Every admin-triggered update starts as an [`UpdateRequest`] and moves
//! through a small, monotonic state machine:
//!
//! ```text
//!             │ owner approve / vote quorum   ┌──────────┐
//!             ├──────────────────────────────►│ Approved │──► enqueued
//!             │                               └──────────┘
//!   ┌─────────┤ owner reject                  ┌──────────┐
//!   │ Pending ├──────────────────────────────►│ Rejected │
//!   └─────────┤                               └──────────┘
//!             │ expiration window elapsed     ┌──────────┐
//!             └──────────────────────────────►│ Expired  │
//!                                             └──────────┘
//!             (Approved, Rejected, Expired are terminal)
//! ```
//!
//! Two approval paths exist. The owner decides unilaterally; their identity
//! is vouched for by the external identity provider and is not re-derived
//! here. The democratic path counts one vote per admin (a re-vote replaces
//! the prior vote) and auto-approves when the approve fraction over the full
//! admin roster reaches the quorum threshold. There is no auto-reject: a
//! request dies by owner action or by expiration.
//!
//! Expiration is checked lazily on every access as well as by the periodic
//! sweep, so a vote arriving after the window always sees the terminal state
//! even if no sweep has run yet.
//!
//! Approval hands exactly one [`QueuedRequest`] to the execution queue. A
//! queue rejection (full slot or burst detection) surfaces as a retryable
//! error; the request stays `Approved` and is never silently dropped or
//! automatically re-queued. A separate day-stamped flag caps democratic
//! approvals at one per reference-timezone day, independent of the per-admin
//! admission rules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::admission::{is_request_expired, AdmissionTracker, DEFAULT_EXPIRATION_MINUTES};
use crate::clock::DayClock;
use crate::identity::{AdminId, AdminIdError};
use crate::queue::{EnqueueRejection, ExecutionQueue, QueuedRequest, RequestKind};


/// Default fraction of the admin roster that must approve for quorum.
pub const DEFAULT_QUORUM_THRESHOLD: f64 = 0.75;

/// A single admin's vote on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    /// In favor of executing the update.
    Approve,
    /// Against executing the update.
    Reject,
}

/// Owner's unilateral decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerDecision {
    /// Approve and hand off for execution.
    Approve,
    /// Reject outright.
    Reject,
}

/// Lifecycle state of an update request. Transitions are monotonic; the
/// three non-pending states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting owner decision or vote quorum.
    Pending,
    /// Approved; an execution was (or is about to be) enqueued.
    Approved,
    /// Rejected by the owner.
    Rejected,
    /// Timed out without resolution.
    Expired,
}

impl RequestStatus {
    /// True for the three terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Stable string form for logs and stats.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

/// One in-flight governance request.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest {
    /// Unique request id.
    pub id: Uuid,
    /// Admin who opened the request.
    pub requester_id: AdminId,
    /// Display name of the requester.
    pub requester_name: String,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Current lifecycle state.
    pub status: RequestStatus,
    /// Votes cast so far, one per admin.
    pub votes: HashMap<AdminId, Vote>,
    /// Which path approved the request, once approved.
    pub approval_path: Option<RequestKind>,
    /// Opaque payload forwarded to the executor on approval.
    pub payload: serde_json::Value,
}

impl UpdateRequest {
    /// Number of approve votes currently counted.
    #[must_use]
    pub fn approve_votes(&self) -> usize {
        self.votes.values().filter(|v| **v == Vote::Approve).count()
    }

    /// Number of reject votes currently counted.
    #[must_use]
    pub fn reject_votes(&self) -> usize {
        self.votes.values().filter(|v| **v == Vote::Reject).count()
    }
}

/// Lifecycle tunables.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    /// Minutes a request may stay pending before expiring.
    pub expiration_minutes: u32,
    /// Approve fraction of the roster required for democratic approval.
    pub quorum_threshold: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiration_minutes: DEFAULT_EXPIRATION_MINUTES,
            quorum_threshold: DEFAULT_QUORUM_THRESHOLD,
        }
    }
}

/// Errors surfaced by lifecycle operations. Admission denials and queue
/// rejections are expected outcomes carried as values; nothing here
/// represents corrupted state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// The admission tracker refused the requester.
    #[error("admission denied: {reason}")]
    AdmissionDenied {
        /// Stable deny reason from the tracker.
        reason: &'static str,
    },

    /// A voter or requester id failed format validation.
    #[error(transparent)]
    InvalidAdminId(#[from] AdminIdError),

    /// No request with this id exists.
    #[error("update request {id} not found")]
    RequestNotFound {
        /// The id that was looked up.
        id: Uuid,
    },

    /// The request has already reached a terminal state.
    #[error("update request {id} is terminal ({status:?})")]
    RequestTerminal {
        /// The request id.
        id: Uuid,
        /// Its terminal status.
        status: RequestStatus,
    },

    /// A retry hand-off was attempted for a request that is not approved.
    #[error("update request {id} is not approved ({status:?})")]
    RequestNotApproved {
        /// The request id.
        id: Uuid,
        /// Its current status.
        status: RequestStatus,
    },

    /// A democratically-approved update already ran today.
    #[error("democratic update already approved for day starting {day_start}")]
    DemocraticLimitReached {
        /// The day boundary the limit is bound to.
        day_start: i64,
    },

    /// The execution queue refused the hand-off. The request remains
    /// approved; the caller is expected to retry the enqueue.
    #[error("execution queue rejected approved request: {0}")]
    QueueRejected(#[from] EnqueueRejection),
}

/// Read-only lifecycle snapshot for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStats {
    /// Requests ever created.
    pub total_requests: usize,
    /// Requests currently pending (and not yet past their window).
    pub pending: usize,
    /// Approved requests.
    pub approved: usize,
    /// Rejected requests.
    pub rejected: usize,
    /// Expired requests, counting pending ones already past their window.
    pub expired: usize,
    /// Whether a democratic approval has been spent for the current day.
    pub democratic_used_today: bool,
}

struct LifecycleState {
    requests: HashMap<Uuid, UpdateRequest>,
    democratic_approved_day: Option<i64>,
}

/// Tracks requests from creation through approval, rejection, or expiry.
pub struct RequestLifecycle {
    tracker: Arc<AdmissionTracker>,
    queue: Arc<ExecutionQueue>,
    clock: DayClock,
    config: LifecycleConfig,
    state: Mutex<LifecycleState>,
}

impl RequestLifecycle {
    /// Create a lifecycle over the shared tracker and queue. The clock must
    /// be the same one the tracker uses, so daily boundaries agree.
    #[must_use]
    pub fn new(
        tracker: Arc<AdmissionTracker>,
        queue: Arc<ExecutionQueue>,
        clock: DayClock,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            tracker,
            queue,
            clock,
            config,
            state: Mutex::new(LifecycleState {
                requests: HashMap::new(),
                democratic_approved_day: None,
            }),
        }
    }

    /// Open a new pending request for `requester_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AdmissionDenied`] when the tracker refuses
    /// the requester, and [`LifecycleError::InvalidAdminId`] on a malformed
    /// id (also covered by the tracker's own validation).
    pub fn create_request(
        &self,
        requester_id: &str,
        requester_name: &str,
        payload: serde_json::Value,
        now: i64,
    ) -> Result<Uuid, LifecycleError> {
        let decision = self.tracker.evaluate(requester_id, now);
        if !decision.is_allowed() {
            return Err(LifecycleError::AdmissionDenied {
                reason: decision.deny_reason.unwrap_or("admission_denied"),
            });
        }
        let requester = AdminId::parse(requester_id)?;
        self.tracker.record_request(requester_id, now);

        let request = UpdateRequest {
            id: Uuid::new_v4(),
            requester_id: requester,
            requester_name: requester_name.to_string(),
            created_at: now,
            status: RequestStatus::Pending,
            votes: HashMap::new(),
            approval_path: None,
            payload,
        };
        let id = request.id;
        let mut state = self.lock_state();
        state.requests.insert(id, request);
        tracing::info!(request_id = %id, requester_id = %requester, "created update request");
        Ok(id)
    }

    /// Apply the owner's unilateral decision to a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RequestNotFound`] or
    /// [`LifecycleError::RequestTerminal`] when the request cannot accept a
    /// decision, and [`LifecycleError::QueueRejected`] when approval could
    /// not be handed to the queue (the request stays approved; retry the
    /// hand-off).
    pub fn owner_decide(
        &self,
        request_id: Uuid,
        decision: OwnerDecision,
        now: i64,
    ) -> Result<RequestStatus, LifecycleError> {
        let mut state = self.lock_state();
        let expiration_minutes = self.config.expiration_minutes;
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(LifecycleError::RequestNotFound { id: request_id })?;

        Self::expire_if_due(request, now, expiration_minutes);
        if request.status.is_terminal() {
            return Err(LifecycleError::RequestTerminal {
                id: request_id,
                status: request.status,
            });
        }

        match decision {
            OwnerDecision::Reject => {
                request.status = RequestStatus::Rejected;
                tracing::info!(request_id = %request_id, "owner rejected update request");
                Ok(RequestStatus::Rejected)
            },
            OwnerDecision::Approve => {
                request.status = RequestStatus::Approved;
                request.approval_path = Some(RequestKind::Owner);
                let queued = QueuedRequest::new(
                    request.requester_id,
                    request.requester_name.clone(),
                    RequestKind::Owner,
                    request.payload.clone(),
                    now,
                );
                tracing::info!(request_id = %request_id, "owner approved update request");
                // The enqueue runs outside the lifecycle lock; the queue has
                // its own.
                drop(state);
                self.queue.enqueue(queued)?;
                Ok(RequestStatus::Approved)
            },
        }
    }

    /// Record `voter_id`'s vote and evaluate the quorum.
    ///
    /// A later vote from the same admin replaces the earlier one. When the
    /// approve fraction over `total_admins` reaches the quorum threshold the
    /// request auto-approves — unless today's democratic approval is already
    /// spent, in which case the request stays pending and
    /// [`LifecycleError::DemocraticLimitReached`] is returned (the vote
    /// itself remains counted).
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidAdminId`] for a malformed voter id,
    /// [`LifecycleError::RequestNotFound`] / [`LifecycleError::RequestTerminal`]
    /// when the request cannot accept votes, the democratic-limit error
    /// above, and [`LifecycleError::QueueRejected`] when the approval
    /// hand-off is refused (the request stays approved).
    pub fn cast_vote(
        &self,
        request_id: Uuid,
        voter_id: &str,
        vote: Vote,
        total_admins: usize,
        now: i64,
    ) -> Result<RequestStatus, LifecycleError> {
        let voter = AdminId::parse(voter_id)?;

        let mut state = self.lock_state();
        let expiration_minutes = self.config.expiration_minutes;
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(LifecycleError::RequestNotFound { id: request_id })?;

        Self::expire_if_due(request, now, expiration_minutes);
        if request.status.is_terminal() {
            return Err(LifecycleError::RequestTerminal {
                id: request_id,
                status: request.status,
            });
        }

        request.votes.insert(voter, vote);
        let approvals = request.approve_votes();
        tracing::debug!(
            request_id = %request_id,
            voter_id = %voter,
            approvals,
            total_admins,
            "vote recorded"
        );

        if total_admins == 0 {
            return Ok(RequestStatus::Pending);
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = approvals as f64 / total_admins as f64;
        if fraction < self.config.quorum_threshold {
            return Ok(RequestStatus::Pending);
        }

        let day_start = self.clock.day_start(now);
        if state.democratic_approved_day == Some(day_start) {
            tracing::warn!(
                request_id = %request_id,
                day_start,
                "quorum reached but the daily democratic approval is spent"
            );
            return Err(LifecycleError::DemocraticLimitReached { day_start });
        }

        // Re-borrow after the throttle check; the earlier borrow ended at
        // the last use of `request`.
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(LifecycleError::RequestNotFound { id: request_id })?;
        request.status = RequestStatus::Approved;
        request.approval_path = Some(RequestKind::Democratic);
        let queued = QueuedRequest::new(
            request.requester_id,
            request.requester_name.clone(),
            RequestKind::Democratic,
            request.payload.clone(),
            now,
        );
        state.democratic_approved_day = Some(day_start);
        tracing::info!(
            request_id = %request_id,
            approvals,
            total_admins,
            "vote quorum approved update request"
        );
        drop(state);
        self.queue.enqueue(queued)?;
        Ok(RequestStatus::Approved)
    }

    /// Re-attempt the queue hand-off for an already-approved request.
    ///
    /// Approval is never rolled back when the queue refuses the first
    /// hand-off; this is the retry path the operator drives until the slot
    /// frees up.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RequestNotFound`] for an unknown id,
    /// [`LifecycleError::RequestNotApproved`] when the request is not in the
    /// approved state, and [`LifecycleError::QueueRejected`] when the queue
    /// refuses again.
    pub fn retry_enqueue(&self, request_id: Uuid, now: i64) -> Result<(), LifecycleError> {
        let state = self.lock_state();
        let request = state
            .requests
            .get(&request_id)
            .ok_or(LifecycleError::RequestNotFound { id: request_id })?;
        if request.status != RequestStatus::Approved {
            return Err(LifecycleError::RequestNotApproved {
                id: request_id,
                status: request.status,
            });
        }
        let kind = request.approval_path.unwrap_or(RequestKind::Owner);
        let queued = QueuedRequest::new(
            request.requester_id,
            request.requester_name.clone(),
            kind,
            request.payload.clone(),
            now,
        );
        drop(state);
        self.queue.enqueue(queued)?;
        tracing::info!(request_id = %request_id, "re-queued approved update request");
        Ok(())
    }

    /// Expire every pending request past its window. Returns the number
    /// expired.
    pub fn cleanup_expired(&self, now: i64) -> usize {
        let mut state = self.lock_state();
        let expiration_minutes = self.config.expiration_minutes;
        let mut expired = 0;
        for request in state.requests.values_mut() {
            if Self::expire_if_due(request, now, expiration_minutes) {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(expired, "expired pending update requests");
        }
        expired
    }

    /// Fetch a request snapshot, applying lazy expiration first.
    #[must_use]
    pub fn get_request(&self, request_id: Uuid, now: i64) -> Option<UpdateRequest> {
        let mut state = self.lock_state();
        let expiration_minutes = self.config.expiration_minutes;
        let request = state.requests.get_mut(&request_id)?;
        Self::expire_if_due(request, now, expiration_minutes);
        Some(request.clone())
    }

    /// Aggregate snapshot for the operator surface. Side-effect-free:
    /// pending requests past their window are *counted* as expired without
    /// being transitioned.
    #[must_use]
    pub fn stats(&self, now: i64) -> LifecycleStats {
        let state = self.lock_state();
        let expiration_minutes = self.config.expiration_minutes;
        let mut stats = LifecycleStats {
            total_requests: state.requests.len(),
            pending: 0,
            approved: 0,
            rejected: 0,
            expired: 0,
            democratic_used_today: state.democratic_approved_day
                == Some(self.clock.day_start(now)),
        };
        for request in state.requests.values() {
            let effective = if request.status == RequestStatus::Pending
                && is_request_expired(request.created_at, now, expiration_minutes)
            {
                RequestStatus::Expired
            } else {
                request.status
            };
            match effective {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Approved => stats.approved += 1,
                RequestStatus::Rejected => stats.rejected += 1,
                RequestStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    /// Transition a pending request to expired when its window has passed.
    fn expire_if_due(request: &mut UpdateRequest, now: i64, expiration_minutes: u32) -> bool {
        if request.status == RequestStatus::Pending
            && is_request_expired(request.created_at, now, expiration_minutes)
        {
            request.status = RequestStatus::Expired;
            tracing::debug!(request_id = %request.id, "update request expired");
            return true;
        }
        false
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

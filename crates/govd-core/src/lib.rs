//! govd-core — governance core for admin-triggered catalog updates.
//!
//! This crate implements the in-memory coordination machinery that gates the
//! recurring "daily update" action behind admission control, serialized
//! execution, and a two-path approval protocol. It is deliberately free of
//! any async runtime or I/O: every operation is a short, lock-protected
//! in-memory step, and the hosting daemon supplies the tickers that drive
//! periodic work.
//!
//! # Modules
//!
//! - [`admission`]: per-admin, per-day request eligibility ledger with
//!   fail-closed validation and a cross-admin overlap rule
//! - [`clock`]: timezone-anchored day-boundary math and the [`TimeSource`]
//!   seam for deterministic tests
//! - [`config`]: TOML configuration with fail-closed validation
//! - [`identity`]: UUID-v4-validated admin identifiers
//! - [`lifecycle`]: the pending → approved/rejected/expired voting state
//!   machine with owner override and the daily democratic throttle
//! - [`queue`]: the single-slot execution queue with burst rejection and
//!   priority ordering
//!
//! # Concurrency Model
//!
//! Each component owns its state behind its own mutex and is mutated only
//! through its public methods; components communicate by call/return, never
//! by reaching into each other, so no cross-component lock ordering exists.
//! Executor invocations happen with every lock released.
//!
//! [`TimeSource`]: clock::TimeSource

pub mod admission;
pub mod clock;
pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod queue;

pub use admission::{AdmissionDecision, AdmissionTracker, AdmissionVerdict};
pub use clock::{DayClock, ManualTimeSource, SystemTimeSource, TimeSource};
pub use config::{ConfigError, GovernanceConfig};
pub use identity::{AdminId, AdminIdError};
pub use lifecycle::{
    LifecycleError, OwnerDecision, RequestLifecycle, RequestStatus, UpdateRequest, Vote,
};
pub use queue::{
    EnqueueRejection, ExecutionOutcome, ExecutionQueue, QueueConfig, QueuedRequest, RequestKind,
};

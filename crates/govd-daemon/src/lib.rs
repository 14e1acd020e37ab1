//! govd-daemon — runtime host for the update governance core.
//!
//! This library wires the pure logic in `govd-core` into a running service:
//! background tickers, the executor boundary, and graceful shutdown. The
//! HTTP layer that fronts the service and the real catalog update executor
//! are supplied by the host application; what lives here is everything
//! between "a route handler called in" and "an update ran exactly once".
//!
//! # Modules
//!
//! - [`executor`]: the [`UpdateExecutor`](executor::UpdateExecutor) boundary
//!   trait and a logging stub
//! - [`service`]: [`GovernanceService`](service::GovernanceService), the
//!   dependency-injected composition root with start/shutdown lifecycle

pub mod executor;
pub mod service;

pub use executor::{ExecutionError, StubUpdateExecutor, UpdateExecutor};
pub use service::{GovernanceService, ServiceStats};

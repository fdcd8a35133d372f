// Library interface for the processor - exposes the maintenance jobs for tests

pub mod circuit_breaker;
pub mod config;
pub mod expiry;
pub mod reconciliation;
pub mod retry_strategy;
pub mod scheduler;
pub mod sweeper;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use expiry::CashbackExpiry;
pub use reconciliation::{ReconcileReport, Reconciler};
pub use scheduler::{PeriodicJob, Scheduler};
pub use sweeper::RetrySweeper;

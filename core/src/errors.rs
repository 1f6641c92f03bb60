//! Error types for circuit breaker operations

use std::time::Duration;
use thiserror::Error;

/// Errors returned from a protected call
#[derive(Debug, Error)]
pub enum CircuitError<E = Box<dyn std::error::Error + Send + Sync>> {
    /// Circuit is open, calls are being rejected
    #[error("circuit '{circuit}' is open (retry after {retry_after:?})")]
    Open {
        circuit: String,
        retry_after: Duration,
    },
    /// Circuit is half-open and its single probe is still running
    #[error("circuit '{circuit}' is half-open and a probe is already in flight")]
    ProbeInFlight { circuit: String },
    /// The call was cancelled before the operation completed
    #[error("call through circuit '{circuit}' was cancelled")]
    Cancelled { circuit: String },
    /// The wrapped operation failed
    #[error("circuit execution failed: {0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the breaker rejected the call without running it
    pub fn is_broken(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. } | CircuitError::ProbeInFlight { .. }
        )
    }

    /// The operation's own error, if the operation ran and failed
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid circuit breaker configuration, reported at construction
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failure ratio must be within (0, 1], got {0}")]
    FailureRatio(f64),
    #[error("minimum throughput must be at least 1")]
    MinimumThroughput,
    #[error("sampling duration must be greater than zero")]
    SamplingDuration,
    #[error("break duration must be greater than zero")]
    BreakDuration,
    #[error("jitter factor must be within [0, 1], got {0}")]
    JitterFactor(f64),
}

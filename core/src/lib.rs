//! Sampling circuit breaker
//!
//! This crate provides a circuit breaker that trips on a failure ratio:
//! - Time-based sliding window of call outcomes (`SlidingWindow`)
//! - State machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - Single-probe recovery from HalfOpen
//! - Monotonic time tracking to prevent NTP clock skew issues
//! - Transition hooks and a read-only state provider
//!
//! # Example
//!
//! ```rust
//! use sampling_breaker::{BreakerState, CircuitBreaker};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::builder("inventory")
//!     .failure_ratio(0.5)
//!     .minimum_throughput(4)
//!     .sampling_duration(Duration::from_secs(10))
//!     .break_duration(Duration::from_secs(5))
//!     .on_opened(|args| println!("Circuit {} opened!", args.circuit))
//!     .build()
//!     .expect("valid configuration");
//!
//! // Execute with circuit protection
//! let result = circuit.execute(|| Ok::<_, String>("stock level"));
//! assert_eq!(result.unwrap(), "stock level");
//!
//! // Observe the state from anywhere
//! let provider = circuit.state_provider();
//! assert_eq!(provider.circuit_state(), BreakerState::Closed);
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod errors;
pub mod provider;
pub mod window;

pub use builder::CircuitBuilder;
pub use callbacks::{CircuitListener, TransitionArgs};
pub use circuit::{CircuitBreaker, Config, UnhandledProbePolicy};
pub use classifier::{
    Cancelled, DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier,
};
pub use errors::{CircuitError, ConfigError};
pub use provider::StateProvider;
pub use tokio_util::sync::CancellationToken;
pub use window::{SlidingWindow, WindowSnapshot};

use std::fmt;
use std::time::Duration;

/// Classification of a completed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The operation returned `Ok`
    Success,
    /// The operation failed and the classifier counts the failure
    HandledFailure,
    /// The operation failed but the classifier ignores the failure
    UnhandledFailure,
}

impl OutcomeKind {
    /// Whether this outcome takes part in failure-ratio calculations
    pub fn is_counted(self) -> bool {
        !matches!(self, OutcomeKind::UnhandledFailure)
    }
}

/// A single outcome recorded in the sampling window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    /// Monotonic offset from the window's creation
    pub timestamp: Duration,
    /// How long the call ran
    pub duration: Duration,
}

/// Externally visible state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "Closed",
            BreakerState::Open => "Open",
            BreakerState::HalfOpen => "HalfOpen",
        }
    }

    /// Map a state name reported by the state machine
    pub(crate) fn from_name(name: &str) -> Self {
        match name {
            "Open" => BreakerState::Open,
            "HalfOpen" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

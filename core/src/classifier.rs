//! Failure classification for exception filtering
//!
//! This module decides which errors count against the circuit. Errors the
//! classifier rejects still reach the caller, but they never move the
//! failure ratio.

use std::any::Any;
use std::time::Duration;

/// Marker passed to classifiers when a call was cancelled or abandoned
/// before the operation produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cancelled;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types, or to
    /// [`Cancelled`] for cancelled calls)
    pub error: &'a dyn Any,
    /// How long the call ran before failing
    pub duration: Duration,
}

impl FailureContext<'_> {
    pub fn is_cancellation(&self) -> bool {
        self.error.is::<Cancelled>()
    }
}

/// Decides whether a failure is handled by the circuit breaker
///
/// # Examples
///
/// ```rust
/// use sampling_breaker::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct ServerErrorClassifier;
///
/// impl FailureClassifier for ServerErrorClassifier {
///     fn should_handle(&self, ctx: &FailureContext<'_>) -> bool {
///         // Only count server errors, never client errors
///         ctx.error
///             .downcast_ref::<u16>()
///             .is_none_or(|status| *status >= 500)
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the failure counts toward opening the circuit
    fn should_handle(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier that handles all errors, cancellations included
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_handle(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_handle(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(error: &'a dyn Any, duration: Duration) -> FailureContext<'a> {
        FailureContext {
            circuit_name: "test",
            error,
            duration,
        }
    }

    #[test]
    fn test_default_classifier_handles_all() {
        let classifier = DefaultClassifier;

        assert!(classifier.should_handle(&context(&"any error", Duration::ZERO)));
        assert!(classifier.should_handle(&context(&Cancelled, Duration::ZERO)));
    }

    #[test]
    fn test_predicate_classifier() {
        // Only slow errors count
        let classifier = PredicateClassifier::new(|ctx| ctx.duration > Duration::from_secs(1));

        assert!(!classifier.should_handle(&context(&"fast", Duration::from_millis(500))));
        assert!(classifier.should_handle(&context(&"slow", Duration::from_secs(2))));
    }

    #[test]
    fn test_error_type_downcast() {
        #[derive(Debug)]
        struct TransportError {
            retryable: bool,
        }

        let classifier = PredicateClassifier::new(|ctx| {
            ctx.error
                .downcast_ref::<TransportError>()
                .is_some_and(|e| e.retryable)
        });

        let transient = TransportError { retryable: true };
        let permanent = TransportError { retryable: false };

        assert!(classifier.should_handle(&context(&transient, Duration::ZERO)));
        assert!(!classifier.should_handle(&context(&permanent, Duration::ZERO)));
        assert!(!classifier.should_handle(&context(&"unknown", Duration::ZERO)));
    }

    #[test]
    fn test_cancellation_is_detectable() {
        assert!(context(&Cancelled, Duration::ZERO).is_cancellation());
        assert!(!context(&"boom", Duration::ZERO).is_cancellation());
    }
}

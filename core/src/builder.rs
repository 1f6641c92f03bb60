//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::{Callbacks, CircuitListener, TransitionArgs},
    circuit::{CircuitBreaker, Config, UnhandledProbePolicy},
    classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier},
    errors::ConfigError,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
///
/// Nothing is validated until [`build`](CircuitBuilder::build), which fails
/// fast with a [`ConfigError`] on the first invalid setting.
pub struct CircuitBuilder {
    name: String,
    config: Config,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration, e.g. one loaded from a file
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the failure ratio (0.0 exclusive to 1.0 inclusive)
    /// Circuit opens when (failures / total_calls) >= this value
    pub fn failure_ratio(mut self, ratio: f64) -> Self {
        self.config.failure_ratio = ratio;
        self
    }

    /// Set minimum number of counted calls before the ratio is evaluated
    pub fn minimum_throughput(mut self, calls: usize) -> Self {
        self.config.minimum_throughput = calls;
        self
    }

    /// Set the length of the sampling window
    pub fn sampling_duration(mut self, duration: Duration) -> Self {
        self.config.sampling_duration = duration;
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.config.break_duration = duration;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: duration * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Cap the number of outcomes kept for `event_log`; counting is unaffected
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.config.max_events = max_events;
        self
    }

    /// Choose what an unhandled failure does to a HalfOpen probe
    pub fn unhandled_probe_policy(mut self, policy: UnhandledProbePolicy) -> Self {
        self.config.unhandled_probe = policy;
        self
    }

    /// Set a failure classifier to filter which errors count against the circuit
    ///
    /// Use this to ignore "expected" errors like validation failures or
    /// client errors (4xx), while still counting server errors (5xx).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sampling_breaker::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only count slow errors
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// # drop(circuit);
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Shorthand for [`failure_classifier`](Self::failure_classifier) with a closure
    pub fn should_handle<F>(self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.failure_classifier(Arc::new(PredicateClassifier::new(predicate)))
    }

    /// Set callback for when circuit opens
    pub fn on_opened<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransitionArgs<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_opened = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_closed<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransitionArgs<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_closed = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_opened<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransitionArgs<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_half_opened = Some(Arc::new(f));
        self
    }

    /// Register a listener; listeners run after the closure callbacks, in
    /// registration order
    pub fn listener(mut self, listener: Arc<dyn CircuitListener>) -> Self {
        self.callbacks.listeners.push(listener);
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let classifier = self
            .failure_classifier
            .unwrap_or_else(|| Arc::new(DefaultClassifier));

        CircuitBreaker::with_parts(self.name, self.config, classifier, self.callbacks)
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("failure_classifier", &self.failure_classifier)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BreakerState;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_builder_defaults() {
        let circuit = CircuitBuilder::new("test").build().unwrap();

        assert_eq!(circuit.state(), BreakerState::Closed);
        assert_eq!(circuit.config(), &Config::default());
    }

    #[test]
    fn test_builder_custom_config() {
        let circuit = CircuitBuilder::new("test")
            .failure_ratio(0.25)
            .minimum_throughput(8)
            .sampling_duration(Duration::from_secs(120))
            .break_duration(Duration::from_secs(60))
            .jitter_factor(0.1)
            .max_events(50)
            .unhandled_probe_policy(UnhandledProbePolicy::Reopen)
            .build()
            .unwrap();

        let config = circuit.config();
        assert_eq!(config.failure_ratio, 0.25);
        assert_eq!(config.minimum_throughput, 8);
        assert_eq!(config.sampling_duration, Duration::from_secs(120));
        assert_eq!(config.break_duration, Duration::from_secs(60));
        assert_eq!(config.jitter_factor, 0.1);
        assert_eq!(config.max_events, 50);
        assert_eq!(config.unhandled_probe, UnhandledProbePolicy::Reopen);
    }

    #[test]
    fn test_builder_rejects_invalid_ratio() {
        let result = CircuitBuilder::new("test").failure_ratio(0.0).build();
        assert_eq!(result.unwrap_err(), ConfigError::FailureRatio(0.0));
    }

    #[test]
    fn test_builder_with_callbacks() {
        let opened = Arc::new(AtomicBool::new(false));
        let opened_clone = opened.clone();

        let circuit = CircuitBuilder::new("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .on_opened(move |args| {
                assert_eq!(args.circuit, "test");
                opened_clone.store(true, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let _ = circuit.execute(|| Err::<(), _>("error 1"));
        let _ = circuit.execute(|| Err::<(), _>("error 2"));

        assert!(opened.load(Ordering::SeqCst));
    }

    #[test]
    fn test_builder_with_listener() {
        #[derive(Default)]
        struct CountingListener {
            opened: AtomicUsize,
            half_opened: AtomicUsize,
        }

        impl CircuitListener for CountingListener {
            fn on_opened(&self, _args: &TransitionArgs<'_>) {
                self.opened.fetch_add(1, Ordering::SeqCst);
            }

            fn on_half_opened(&self, _args: &TransitionArgs<'_>) {
                self.half_opened.fetch_add(1, Ordering::SeqCst);
            }
        }

        let listener = Arc::new(CountingListener::default());
        let circuit = CircuitBuilder::new("test")
            .failure_ratio(1.0)
            .minimum_throughput(1)
            .break_duration(Duration::from_millis(10))
            .listener(listener.clone())
            .build()
            .unwrap();

        let _ = circuit.execute(|| Err::<(), _>("error"));
        std::thread::sleep(Duration::from_millis(20));
        let _ = circuit.execute(|| Err::<(), _>("still failing"));

        assert_eq!(listener.opened.load(Ordering::SeqCst), 2);
        assert_eq!(listener.half_opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder_accepts_whole_config() {
        let config = Config {
            failure_ratio: 0.5,
            minimum_throughput: 3,
            ..Config::default()
        };

        let circuit = CircuitBuilder::new("test").config(config.clone()).build().unwrap();
        assert_eq!(circuit.config(), &config);
    }
}

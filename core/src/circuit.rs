//! Circuit breaker implementation using state machines
//!
//! Every call goes through the same two steps: `acquire` decides under the
//! state lock whether the call may run, and the returned permit settles the
//! outcome back into the window and the state machine. The wrapped operation
//! itself always runs without holding the lock.

use crate::{
    BreakerState, Outcome, OutcomeKind,
    builder::CircuitBuilder,
    callbacks::{Callbacks, Transition},
    classifier::{Cancelled, DefaultClassifier, FailureClassifier, FailureContext},
    errors::{CircuitError, ConfigError},
    provider::StateProvider,
    window::{DEFAULT_MAX_EVENTS, SlidingWindow, WindowSnapshot},
};
use state_machines::state_machine;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a HalfOpen probe does to the circuit when it fails with an error
/// the classifier does not handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UnhandledProbePolicy {
    /// Stay HalfOpen and release the probe slot; the next call probes again
    #[default]
    StayHalfOpen,
    /// Treat the probe as failed and reopen the circuit
    Reopen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Failure ratio (0.0 exclusive to 1.0 inclusive) at which the circuit opens
    pub failure_ratio: f64,

    /// Minimum number of counted calls in the window before the ratio is evaluated
    pub minimum_throughput: usize,

    /// Length of the sliding window used to sample outcomes
    pub sampling_duration: Duration,

    /// How long the circuit stays Open before a probe is admitted
    pub break_duration: Duration,

    /// Jitter factor for break_duration (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: duration * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    /// Behavior of a probe that fails with an unhandled error
    pub unhandled_probe: UnhandledProbePolicy,

    /// Upper bound on outcomes kept in the inspection log (`event_log`)
    pub max_events: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_ratio: 0.1,
            minimum_throughput: 100,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(5),
            jitter_factor: 0.0,
            unhandled_probe: UnhandledProbePolicy::StayHalfOpen,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl Config {
    /// Reject configurations the breaker cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(ConfigError::FailureRatio(self.failure_ratio));
        }
        if self.minimum_throughput == 0 {
            return Err(ConfigError::MinimumThroughput);
        }
        if self.sampling_duration.is_zero() {
            return Err(ConfigError::SamplingDuration);
        }
        if self.break_duration.is_zero() {
            return Err(ConfigError::BreakDuration);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterFactor(self.jitter_factor));
        }
        Ok(())
    }

    /// Break duration for a single Open period, jittered when configured
    pub(crate) fn open_duration(&self) -> Duration {
        let base_ms = u64::try_from(self.break_duration.as_millis()).unwrap_or(u64::MAX);
        if self.jitter_factor <= 0.0 || base_ms == 0 {
            return self.break_duration;
        }

        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: base_ms,
            multiplier: 1.0,
            max_delay_ms: base_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, self.jitter_factor))
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub window: Arc<SlidingWindow>,
    pub classifier: Arc<dyn FailureClassifier>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        let config = Config::default();
        Self {
            name: String::new(),
            window: Arc::new(SlidingWindow::with_max_events(
                config.sampling_duration,
                config.max_events,
            )),
            config,
            classifier: Arc::new(DefaultClassifier),
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &self.window)
            .field("classifier", &self.classifier)
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Monotonic offset at which the circuit opened
    pub opened_at: Duration,
    /// Break duration chosen for this Open period
    pub break_duration: Duration,
}

/// Result of the HalfOpen probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Passed,
    Failed,
}

/// The probe currently admitted in HalfOpen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSlot {
    pub id: u64,
    pub started_at: Duration,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub probe: Option<ProbeSlot>,
    pub verdict: Option<ProbeVerdict>,
    /// How long a probe may run before it is considered lost; the break
    /// duration of the Open period that preceded this HalfOpen
    pub probe_timeout: Duration,
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,  // Enable dynamic mode for runtime state transitions

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [break_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Trip once minimum throughput is reached and the failure ratio is at or above the limit
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.window
            .snapshot()
            .exceeds(ctx.config.failure_ratio, ctx.config.minimum_throughput)
    }
}

impl Circuit<HalfOpen> {
    /// A failed probe reopens the circuit
    fn should_open(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.verdict == Some(ProbeVerdict::Failed))
    }

    /// A passed probe closes the circuit
    fn should_close(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.verdict == Some(ProbeVerdict::Passed))
    }
}

impl Circuit<Open> {
    /// Check if the break duration has elapsed for Open -> HalfOpen
    fn break_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open().is_some_and(|data| {
            ctx.window.monotonic_time().saturating_sub(data.opened_at) >= data.break_duration
        })
    }
}

/// How a call was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Admitted while Closed, tagged with the Closed period that issued it
    Closed(u64),
    Probe(u64),
}

/// State shared between the breaker and its state providers
pub(crate) struct Shared {
    machine: Mutex<DynamicCircuit>,
    context: CircuitContext,
    callbacks: Callbacks,
    probe_ids: AtomicU64,
    /// Bumped under the state lock every time the circuit enters Closed
    closed_periods: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DynamicCircuit> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> BreakerState {
        BreakerState::from_name(self.lock().current_state())
    }

    /// Decide whether a call may run, driving Open -> HalfOpen when due
    fn acquire<E>(&self) -> Result<CallPermit<'_>, CircuitError<E>> {
        let now = self.context.window.monotonic_time();
        let mut transition = None;

        let admission = {
            let mut machine = self.lock();

            if machine.current_state() == "Open" {
                let break_duration = machine
                    .open_data()
                    .map(|data| data.break_duration)
                    .unwrap_or_default();
                if machine.handle(CircuitEvent::AttemptReset).is_ok() {
                    if let Some(data) = machine.half_open_data_mut() {
                        data.probe_timeout = break_duration;
                    }
                    transition = Some(Transition {
                        from: BreakerState::Open,
                        to: BreakerState::HalfOpen,
                        outcome: None,
                        break_duration: None,
                    });
                }
            }

            match BreakerState::from_name(machine.current_state()) {
                BreakerState::Closed => Ok(Admission::Closed(
                    self.closed_periods.load(Ordering::Relaxed),
                )),
                BreakerState::Open => {
                    let retry_after = machine
                        .open_data()
                        .map(|data| {
                            data.opened_at
                                .saturating_add(data.break_duration)
                                .saturating_sub(now)
                        })
                        .unwrap_or_default();
                    tracing::debug!(circuit = %self.context.name, ?retry_after, "call rejected, circuit open");
                    Err(CircuitError::Open {
                        circuit: self.context.name.clone(),
                        retry_after,
                    })
                }
                BreakerState::HalfOpen => self.admit_probe(&mut machine, now),
            }
        };

        if let Some(transition) = transition {
            self.callbacks.dispatch(&self.context.name, transition);
        }

        admission.map(|admission| CallPermit {
            shared: self,
            admission,
            started_at: now,
            settled: false,
        })
    }

    fn admit_probe<E>(
        &self,
        machine: &mut DynamicCircuit,
        now: Duration,
    ) -> Result<Admission, CircuitError<E>> {
        let in_flight = || CircuitError::ProbeInFlight {
            circuit: self.context.name.clone(),
        };
        let Some(data) = machine.half_open_data_mut() else {
            return Err(in_flight());
        };

        // A probe that never settled within a break duration is considered lost
        if let Some(slot) = data.probe
            && now.saturating_sub(slot.started_at) < data.probe_timeout
        {
            tracing::debug!(circuit = %self.context.name, probe = slot.id, "call rejected, probe in flight");
            return Err(in_flight());
        }

        let id = self.probe_ids.fetch_add(1, Ordering::Relaxed);
        data.probe = Some(ProbeSlot {
            id,
            started_at: now,
        });
        data.verdict = None;
        Ok(Admission::Probe(id))
    }

    fn classify(&self, error: &dyn Any, duration: Duration) -> OutcomeKind {
        let ctx = FailureContext {
            circuit_name: &self.context.name,
            error,
            duration,
        };
        if self.context.classifier.should_handle(&ctx) {
            OutcomeKind::HandledFailure
        } else {
            OutcomeKind::UnhandledFailure
        }
    }

    /// Record a completed call and apply the resulting transition
    fn settle(&self, admission: Admission, kind: OutcomeKind, duration: Duration) {
        let transition = {
            let mut machine = self.lock();
            let state = BreakerState::from_name(machine.current_state());

            match (admission, state) {
                (Admission::Closed(period), BreakerState::Closed)
                    if period == self.closed_periods.load(Ordering::Relaxed) =>
                {
                    self.context.window.record(kind, duration);
                    if kind.is_counted() && machine.handle(CircuitEvent::Trip).is_ok() {
                        let break_duration = self.mark_open(&mut machine);
                        Some(Transition {
                            from: BreakerState::Closed,
                            to: BreakerState::Open,
                            outcome: Some(kind),
                            break_duration: Some(break_duration),
                        })
                    } else {
                        None
                    }
                }
                (Admission::Probe(id), BreakerState::HalfOpen) => {
                    self.resolve_probe(&mut machine, id, kind)
                }
                _ => {
                    tracing::debug!(circuit = %self.context.name, ?kind, %state, "discarding outcome of a stale call");
                    None
                }
            }
        };

        if let Some(transition) = transition {
            self.callbacks.dispatch(&self.context.name, transition);
        }
    }

    fn resolve_probe(
        &self,
        machine: &mut DynamicCircuit,
        id: u64,
        kind: OutcomeKind,
    ) -> Option<Transition> {
        let verdict = match kind {
            OutcomeKind::Success => Some(ProbeVerdict::Passed),
            OutcomeKind::HandledFailure => Some(ProbeVerdict::Failed),
            OutcomeKind::UnhandledFailure => match self.context.config.unhandled_probe {
                UnhandledProbePolicy::Reopen => Some(ProbeVerdict::Failed),
                UnhandledProbePolicy::StayHalfOpen => None,
            },
        };

        {
            let data = machine.half_open_data_mut()?;
            if data.probe.is_none_or(|slot| slot.id != id) {
                tracing::debug!(circuit = %self.context.name, probe = id, "discarding outcome of a superseded probe");
                return None;
            }
            data.verdict = verdict;
            if verdict.is_none() {
                data.probe = None;
                tracing::info!(circuit = %self.context.name, "probe failed with an unhandled error, staying half-open");
                return None;
            }
        }

        match verdict {
            Some(ProbeVerdict::Passed) if machine.handle(CircuitEvent::Close).is_ok() => {
                self.closed_periods.fetch_add(1, Ordering::Relaxed);
                self.context.window.clear();
                Some(Transition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Closed,
                    outcome: Some(kind),
                    break_duration: None,
                })
            }
            Some(ProbeVerdict::Failed) if machine.handle(CircuitEvent::Trip).is_ok() => {
                let break_duration = self.mark_open(machine);
                Some(Transition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Open,
                    outcome: Some(kind),
                    break_duration: Some(break_duration),
                })
            }
            _ => None,
        }
    }

    /// Apply Open-state bookkeeping (timestamp, break duration, fresh window)
    fn mark_open(&self, machine: &mut DynamicCircuit) -> Duration {
        let break_duration = self.context.config.open_duration();
        if let Some(data) = machine.open_data_mut() {
            data.opened_at = self.context.window.monotonic_time();
            data.break_duration = break_duration;
        }
        self.context.window.clear();
        break_duration
    }
}

/// Admission to run one call; settles exactly once, on completion or on drop
#[must_use]
struct CallPermit<'a> {
    shared: &'a Shared,
    admission: Admission,
    started_at: Duration,
    settled: bool,
}

impl CallPermit<'_> {
    fn elapsed(&self) -> Duration {
        self.shared
            .context
            .window
            .monotonic_time()
            .saturating_sub(self.started_at)
    }

    fn settle(mut self, kind: OutcomeKind) {
        self.settled = true;
        self.shared.settle(self.admission, kind, self.elapsed());
    }

    fn finish<T, E: 'static>(self, result: Result<T, E>) -> Result<T, CircuitError<E>> {
        match result {
            Ok(value) => {
                self.settle(OutcomeKind::Success);
                Ok(value)
            }
            Err(error) => {
                let kind = self.shared.classify(&error, self.elapsed());
                self.settle(kind);
                Err(CircuitError::Execution(error))
            }
        }
    }

    fn cancel<T, E>(self) -> Result<T, CircuitError<E>> {
        let circuit = self.shared.context.name.clone();
        let kind = self.shared.classify(&Cancelled, self.elapsed());
        self.settle(kind);
        Err(CircuitError::Cancelled { circuit })
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Future dropped mid-flight or the operation panicked
        let duration = self.elapsed();
        let kind = self.shared.classify(&Cancelled, duration);
        tracing::debug!(circuit = %self.shared.context.name, ?kind, "call abandoned before completion");
        self.shared.settle(self.admission, kind, duration);
    }
}

/// Circuit breaker public API
///
/// The breaker is `Send + Sync`; share it by reference or wrap it in an `Arc`.
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a circuit breaker that handles every error (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        Self::with_parts(
            name.into(),
            config,
            Arc::new(DefaultClassifier),
            Callbacks::new(),
        )
    }

    /// Create a circuit breaker from validated parts (used by builder)
    pub(crate) fn with_parts(
        name: String,
        config: Config,
        classifier: Arc<dyn FailureClassifier>,
        callbacks: Callbacks,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let window = Arc::new(SlidingWindow::with_max_events(
            config.sampling_duration,
            config.max_events,
        ));
        let context = CircuitContext {
            name,
            config,
            window,
            classifier,
        };
        let machine = DynamicCircuit::new(context.clone());

        Ok(Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                context,
                callbacks,
                probe_ids: AtomicU64::new(1),
                closed_periods: AtomicU64::new(0),
            }),
        })
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBuilder {
        CircuitBuilder::new(name)
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Rejected calls return [`CircuitError::Open`] or
    /// [`CircuitError::ProbeInFlight`] without running `operation`. Errors from
    /// the operation come back unchanged inside [`CircuitError::Execution`].
    pub fn execute<T, E, F>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let permit = self.shared.acquire()?;
        permit.finish(operation())
    }

    /// Execute an asynchronous operation with circuit breaker protection
    ///
    /// The operation receives a child of `cancel`. If `cancel` fires before the
    /// operation completes, the operation is dropped, the call is classified
    /// through the failure classifier as [`Cancelled`], and
    /// [`CircuitError::Cancelled`] is returned.
    pub async fn execute_async<T, E, F, Fut>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        if cancel.is_cancelled() {
            return Err(CircuitError::Cancelled {
                circuit: self.shared.context.name.clone(),
            });
        }

        let permit = self.shared.acquire()?;
        let call = operation(cancel.child_token());

        tokio::select! {
            biased;
            () = cancel.cancelled() => permit.cancel(),
            result = call => permit.finish(result),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.context.name
    }

    pub fn config(&self) -> &Config {
        &self.shared.context.config
    }

    /// Current state; Open -> HalfOpen only happens on the next call
    pub fn state(&self) -> BreakerState {
        self.shared.state()
    }

    /// Read-only handle to the state, independent of the execution path
    pub fn state_provider(&self) -> StateProvider {
        StateProvider::new(Arc::clone(&self.shared))
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == BreakerState::HalfOpen
    }

    /// Counts over the current sampling window
    pub fn snapshot(&self) -> WindowSnapshot {
        self.shared.context.window.snapshot()
    }

    /// Last `limit` outcomes recorded in the window, oldest first
    pub fn event_log(&self, limit: usize) -> Vec<Outcome> {
        self.shared.context.window.event_log(limit)
    }

    /// Clear all outcomes and force the circuit to Closed
    pub fn reset(&self) {
        let previous = {
            let mut machine = self.shared.lock();
            let previous = BreakerState::from_name(machine.current_state());
            self.shared.context.window.clear();
            // Recreate machine in Closed state
            *machine = DynamicCircuit::new(self.shared.context.clone());
            self.shared.closed_periods.fetch_add(1, Ordering::Relaxed);
            previous
        };

        if previous != BreakerState::Closed {
            self.shared.callbacks.dispatch(
                &self.shared.context.name,
                Transition {
                    from: previous,
                    to: BreakerState::Closed,
                    outcome: None,
                    break_duration: None,
                },
            );
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.context.name)
            .field("state", &self.state())
            .field("config", &self.shared.context.config)
            .field("callbacks", &self.shared.callbacks)
            .finish()
    }
}

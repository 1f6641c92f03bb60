//! Callback system for circuit breaker state transitions
//!
//! Hooks run synchronously after the breaker has released its state lock.
//! A panicking hook is caught and logged; it never undoes the transition
//! and never prevents the remaining hooks from running.

use crate::{BreakerState, OutcomeKind};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Metadata describing a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionArgs<'a> {
    pub circuit: &'a str,
    pub from: BreakerState,
    pub to: BreakerState,
    /// Outcome of the call that caused the transition, if any
    pub outcome: Option<OutcomeKind>,
    /// How long the circuit stays open (only set when opening)
    pub break_duration: Option<Duration>,
}

/// Listener with a fixed set of transition hooks
///
/// Every method defaults to a no-op, so implementors only override what
/// they need.
pub trait CircuitListener: Send + Sync {
    fn on_opened(&self, _args: &TransitionArgs<'_>) {}

    fn on_closed(&self, _args: &TransitionArgs<'_>) {}

    fn on_half_opened(&self, _args: &TransitionArgs<'_>) {}
}

pub type Hook = Arc<dyn Fn(&TransitionArgs<'_>) + Send + Sync>;

/// Transition recorded under the state lock, dispatched after it is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub outcome: Option<OutcomeKind>,
    pub break_duration: Option<Duration>,
}

/// Callbacks for circuit breaker events
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_opened: Option<Hook>,
    pub on_closed: Option<Hook>,
    pub on_half_opened: Option<Hook>,
    pub listeners: Vec<Arc<dyn CircuitListener>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn dispatch(&self, circuit: &str, transition: Transition) {
        let args = TransitionArgs {
            circuit,
            from: transition.from,
            to: transition.to,
            outcome: transition.outcome,
            break_duration: transition.break_duration,
        };

        match transition.to {
            BreakerState::Open => {
                tracing::warn!(
                    circuit,
                    from = %args.from,
                    break_duration = ?args.break_duration,
                    "circuit opened"
                );
                if let Some(hook) = &self.on_opened {
                    isolate("on_opened", &args, || hook(&args));
                }
                for listener in &self.listeners {
                    isolate("on_opened", &args, || listener.on_opened(&args));
                }
            }
            BreakerState::HalfOpen => {
                tracing::info!(circuit, "circuit half-open, admitting a probe");
                if let Some(hook) = &self.on_half_opened {
                    isolate("on_half_opened", &args, || hook(&args));
                }
                for listener in &self.listeners {
                    isolate("on_half_opened", &args, || listener.on_half_opened(&args));
                }
            }
            BreakerState::Closed => {
                tracing::info!(circuit, from = %args.from, "circuit closed");
                if let Some(hook) = &self.on_closed {
                    isolate("on_closed", &args, || hook(&args));
                }
                for listener in &self.listeners {
                    isolate("on_closed", &args, || listener.on_closed(&args));
                }
            }
        }
    }
}

fn isolate(event: &str, args: &TransitionArgs<'_>, hook: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        tracing::error!(circuit = args.circuit, event, %message, "circuit hook panicked");
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_opened", &self.on_opened.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .field("on_half_opened", &self.on_half_opened.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn opened() -> Transition {
        Transition {
            from: BreakerState::Closed,
            to: BreakerState::Open,
            outcome: Some(OutcomeKind::HandledFailure),
            break_duration: Some(Duration::from_secs(5)),
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(&'static str, BreakerState, BreakerState)>>,
    }

    impl CircuitListener for Recorder {
        fn on_opened(&self, args: &TransitionArgs<'_>) {
            self.seen.lock().unwrap().push(("opened", args.from, args.to));
        }

        fn on_closed(&self, args: &TransitionArgs<'_>) {
            self.seen.lock().unwrap().push(("closed", args.from, args.to));
        }
    }

    #[test]
    fn test_dispatch_routes_by_target_state() {
        let recorder = Arc::new(Recorder::default());
        let callbacks = Callbacks {
            listeners: vec![recorder.clone() as Arc<dyn CircuitListener>],
            ..Callbacks::new()
        };

        callbacks.dispatch("db", opened());
        callbacks.dispatch(
            "db",
            Transition {
                from: BreakerState::Open,
                to: BreakerState::HalfOpen,
                outcome: None,
                break_duration: None,
            },
        );
        callbacks.dispatch(
            "db",
            Transition {
                from: BreakerState::HalfOpen,
                to: BreakerState::Closed,
                outcome: Some(OutcomeKind::Success),
                break_duration: None,
            },
        );

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("opened", BreakerState::Closed, BreakerState::Open),
                ("closed", BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }

    #[test]
    fn test_closure_hook_receives_metadata() {
        let captured = Arc::new(Mutex::new(None));
        let sink = captured.clone();

        let callbacks = Callbacks {
            on_opened: Some(Arc::new(move |args: &TransitionArgs<'_>| {
                *sink.lock().unwrap() = Some((args.circuit.to_string(), args.break_duration));
            })),
            ..Callbacks::new()
        };

        callbacks.dispatch("payments", opened());

        assert_eq!(
            *captured.lock().unwrap(),
            Some(("payments".to_string(), Some(Duration::from_secs(5))))
        );
    }

    fn exploding_hook(_args: &TransitionArgs<'_>) {
        panic!("hook exploded");
    }

    #[test]
    fn test_panicking_hook_is_isolated() {
        let recorder = Arc::new(Recorder::default());
        let callbacks = Callbacks {
            on_opened: Some(Arc::new(exploding_hook)),
            listeners: vec![recorder.clone() as Arc<dyn CircuitListener>],
            ..Callbacks::new()
        };

        callbacks.dispatch("db", opened());

        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}

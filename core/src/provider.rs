//! Read-only view of a circuit breaker's state

use crate::BreakerState;
use crate::circuit::Shared;
use std::sync::Arc;

/// Cheap, cloneable handle that reports the current state of a breaker
///
/// Reads are serialized with the breaker's transitions, so a transition is
/// visible to every read issued after it completes. Reading never moves the
/// breaker: an Open circuit whose break has elapsed still reports Open until
/// the next call arrives.
#[derive(Clone)]
pub struct StateProvider {
    shared: Arc<Shared>,
}

impl StateProvider {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn circuit_state(&self) -> BreakerState {
        self.shared.state()
    }
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider")
            .field("state", &self.circuit_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{BreakerState, CircuitBreaker};
    use std::time::Duration;

    #[test]
    fn test_provider_tracks_transitions() {
        let circuit = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(1)
            .break_duration(Duration::from_millis(10))
            .build()
            .unwrap();
        let provider = circuit.state_provider();

        assert_eq!(provider.circuit_state(), BreakerState::Closed);

        let _ = circuit.execute(|| Err::<(), _>("error"));
        assert_eq!(provider.circuit_state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(20));
        // No lazy transition on read
        assert_eq!(provider.circuit_state(), BreakerState::Open);

        let _ = circuit.execute(|| Ok::<_, &str>(()));
        assert_eq!(provider.circuit_state(), BreakerState::Closed);
    }

    #[test]
    fn test_repeated_reads_are_stable() {
        let circuit = CircuitBreaker::builder("test").build().unwrap();
        let provider = circuit.state_provider();
        let clone = provider.clone();

        let first = provider.circuit_state();
        for _ in 0..10 {
            assert_eq!(provider.circuit_state(), first);
            assert_eq!(clone.circuit_state(), first);
        }
    }
}

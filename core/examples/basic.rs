//! Basic circuit breaker usage example

use sampling_breaker::{CircuitBreaker, CircuitError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
enum PaymentError {
    #[error("gateway timed out")]
    Timeout,
    #[error("card declined")]
    Declined,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sampling_breaker=debug".into()),
        )
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    // Declined payments are business errors and never count against the circuit
    let circuit = CircuitBreaker::builder("payment_api")
        .failure_ratio(0.5)
        .minimum_throughput(4)
        .sampling_duration(Duration::from_secs(10))
        .break_duration(Duration::from_millis(500))
        .should_handle(|ctx| {
            !matches!(ctx.error.downcast_ref::<PaymentError>(), Some(PaymentError::Declined))
        })
        .on_opened(|args| println!("Circuit '{}' opened for {:?}", args.circuit, args.break_duration))
        .on_closed(|args| println!("Circuit '{}' closed", args.circuit))
        .on_half_opened(|args| println!("Circuit '{}' half-open, probing...", args.circuit))
        .build()
        .expect("valid circuit configuration");
    let provider = circuit.state_provider();

    println!("Initial state: {}\n", provider.circuit_state());

    println!("--- Mixed traffic ---");
    for i in 1..=2 {
        match circuit.execute(move || Ok::<_, PaymentError>(format!("Payment {i}"))) {
            Ok(result) => println!("ok   {result}"),
            Err(e) => println!("err  {e}"),
        }
    }
    match circuit.execute(|| Err::<String, _>(PaymentError::Declined)) {
        Ok(_) => println!("ok"),
        Err(e) => println!("err  {e:?} (ignored by the classifier)"),
    }
    println!("Window: {:?}\n", circuit.snapshot());

    println!("--- Triggering failures ---");
    for _ in 1..=2 {
        if let Err(e) = circuit.execute(|| Err::<String, _>(PaymentError::Timeout)) {
            println!("err  {e:?}");
        }
    }
    println!("State: {}\n", provider.circuit_state());

    println!("--- Attempting call while open ---");
    match circuit.execute(|| Ok::<_, PaymentError>("should be rejected")) {
        Err(CircuitError::Open { retry_after, .. }) => {
            println!("rejected, retry after {retry_after:?}");
        }
        other => println!("unexpected: {other:?}"),
    }
    println!();

    println!("--- Waiting out the break ---");
    std::thread::sleep(Duration::from_millis(600));
    match circuit.execute(|| Ok::<_, PaymentError>("Payment recovered")) {
        Ok(result) => println!("ok   {result}"),
        Err(e) => println!("err  {e}"),
    }
    println!("State: {}", provider.circuit_state());
}

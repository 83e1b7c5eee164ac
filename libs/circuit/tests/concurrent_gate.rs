use std::sync::Arc;

use gsm_circuit::{BreakerConfig, CircuitGate, CircuitState, EndpointKey, Outcome};
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn half_open_grants_exactly_one_probe_under_contention() {
    let gate = CircuitGate::new(BreakerConfig::default());
    let key = EndpointKey::new("salesforce", "query");
    gate.force_state(&key, CircuitState::HalfOpen);

    let barrier = Arc::new(Barrier::new(16));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let gate = gate.clone();
        let key = key.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            gate.allow(&key).ok()
        }));
    }

    let mut permits = Vec::new();
    for handle in handles {
        if let Some(permit) = handle.await.unwrap() {
            permits.push(permit);
        }
    }
    assert_eq!(permits.len(), 1);
    let probe = permits.pop().unwrap();
    assert!(probe.is_probe());

    gate.record_outcome(probe, Outcome::Success);
    assert_eq!(gate.state(&key), CircuitState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_trip_once() {
    let config = BreakerConfig {
        failure_threshold: 8,
        ..Default::default()
    };
    let gate = CircuitGate::new(config);
    let key = EndpointKey::new("zendesk", "create_ticket");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let gate = gate.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            if let Ok(permit) = gate.allow(&key) {
                gate.record_outcome(permit, Outcome::TransientFailure);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let health = gate.health(&key).unwrap();
    assert_eq!(health.state, CircuitState::Open);
    assert_eq!(health.trips, 1);
}

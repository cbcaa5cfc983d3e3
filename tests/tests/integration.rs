//! End-to-end circuit breaker scenarios against mock dependencies.
//!
//! These tests drive the full stack the way the product code does: one
//! registry per process, one named breaker per dependency, call sites
//! wrapping their async operations.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fusebox::{
    BreakerOptions, CircuitBreakerError, CircuitBreakerRegistry, CircuitState, RegistryError,
};
use fusebox_testing::{
    BackendService, FailingService, HealthyService, RecoveringService, assert_service_calls,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fusebox=debug")
        .try_init();
}

fn options(threshold: u32, timeout: Duration) -> BreakerOptions {
    BreakerOptions::new()
        .failure_threshold(threshold)
        .reset_timeout(timeout)
}

#[tokio::test]
async fn test_open_circuit_fails_fast_without_calling_service() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry
        .get_or_create("mail", options(3, Duration::from_secs(60)))
        .unwrap();
    let service = Arc::new(FailingService::new("mail"));

    for _ in 0..3 {
        let svc = Arc::clone(&service);
        let _ = breaker.call(move || async move { svc.fetch().await }).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // The fourth call is rejected before it reaches the dependency.
    let svc = Arc::clone(&service);
    let result = breaker.call(move || async move { svc.fetch().await }).await;
    assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    assert_service_calls!(service, 3);
}

#[tokio::test]
async fn test_trial_success_closes_after_reset_timeout() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry
        .get_or_create("llm", options(3, Duration::from_millis(50)))
        .unwrap();
    let service = Arc::new(RecoveringService::new("llm", 3));

    for _ in 0..3 {
        let svc = Arc::clone(&service);
        let _ = breaker.call(move || async move { svc.fetch().await }).await;
    }
    assert!(breaker.is_open());

    tokio::time::sleep(Duration::from_millis(80)).await;

    let svc = Arc::clone(&service);
    let result = breaker.call(move || async move { svc.fetch().await }).await;
    assert_eq!(result.unwrap(), "llm response");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
    assert_service_calls!(service, 4);
}

#[tokio::test]
async fn test_failed_trial_reopens_with_fresh_window() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry
        .get_or_create("llm", options(3, Duration::from_millis(50)))
        .unwrap();
    let service = Arc::new(RecoveringService::new("llm", 4));

    for _ in 0..3 {
        let svc = Arc::clone(&service);
        let _ = breaker.call(move || async move { svc.fetch().await }).await;
    }
    assert!(breaker.is_open());

    // First probe still fails; the window restarts from the probe.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let svc = Arc::clone(&service);
    let result = breaker.call(move || async move { svc.fetch().await }).await;
    assert!(matches!(result, Err(CircuitBreakerError::Operation { .. })));
    assert!(breaker.is_open());

    let svc = Arc::clone(&service);
    let result = breaker.call(move || async move { svc.fetch().await }).await;
    assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    assert_service_calls!(service, 4);

    // Second probe succeeds once the new window elapses.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let svc = Arc::clone(&service);
    let result = breaker.call(move || async move { svc.fetch().await }).await;
    assert!(result.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_fallback_supplies_degraded_result_when_open() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry
        .get_or_create("llm", options(1, Duration::from_secs(60)))
        .unwrap();

    let down = Arc::new(FailingService::new("llm"));
    let svc = Arc::clone(&down);
    let _ = breaker.call(move || async move { svc.fetch().await }).await;
    assert!(breaker.is_open());

    let healthy = Arc::new(HealthyService::new("llm"));
    let svc = Arc::clone(&healthy);
    let guarded = breaker.wrap_with_fallback(
        move |prompt: String| {
            let svc = Arc::clone(&svc);
            async move {
                svc.fetch()
                    .await
                    .map(|reply| serde_json::json!({ "prompt": prompt, "reply": reply }))
            }
        },
        |err, _prompt: String| async move {
            assert!(err.is_circuit_open());
            serde_json::json!({ "degraded": true })
        },
    );

    let value = guarded("summarize my inbox".to_string()).await;
    assert_eq!(value, serde_json::json!({ "degraded": true }));
    assert_service_calls!(healthy, 0);
}

#[tokio::test]
async fn test_registry_returns_identical_instance() {
    let registry = CircuitBreakerRegistry::new();
    let first = registry
        .get_or_create("x", options(1, Duration::from_millis(5)))
        .unwrap();

    // A second lookup needs no options once the name is registered, and
    // later options are ignored in favor of the original configuration.
    let second = registry.get("x").unwrap();
    let third = registry
        .get_or_create("x", options(9, Duration::from_secs(9)))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(third.config().failure_threshold, 1);
}

#[tokio::test]
async fn test_unknown_breaker_is_a_configuration_error() {
    let registry = CircuitBreakerRegistry::new();
    match registry.get("credentials") {
        Err(RegistryError::NotRegistered(name)) => assert_eq!(name, "credentials"),
        other => panic!("expected NotRegistered, got {other:?}"),
    }
}

#[tokio::test]
async fn test_status_snapshot_across_dependencies() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    registry
        .get_or_create("credentials", options(3, Duration::from_secs(10)))
        .unwrap();
    registry
        .get_or_create("llm", options(5, Duration::from_secs(30)))
        .unwrap();
    let mail = registry
        .get_or_create("mail", options(4, Duration::from_secs(20)))
        .unwrap();

    let service = Arc::new(FailingService::new("mail"));
    for _ in 0..4 {
        let svc = Arc::clone(&service);
        let _ = mail.call(move || async move { svc.fetch().await }).await;
    }

    let status = registry.status();
    assert_eq!(status["credentials"].state, CircuitState::Closed);
    assert_eq!(status["llm"].state, CircuitState::Closed);
    assert_eq!(status["mail"].state, CircuitState::Open);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["mail"]["state"], "Open");
    assert_eq!(json["credentials"]["state"], "Closed");
}

#[tokio::test]
async fn test_concurrent_callers_share_one_trial() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry
        .get_or_create("llm", options(1, Duration::from_millis(20)))
        .unwrap();
    let service = Arc::new(RecoveringService::new("llm", 1));

    let svc = Arc::clone(&service);
    let _ = breaker.call(move || async move { svc.fetch().await }).await;
    assert!(breaker.is_open());

    tokio::time::sleep(Duration::from_millis(40)).await;

    // Four callers race for the probe; the slow trial keeps the slot taken
    // while the others are turned away.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let breaker = Arc::clone(&breaker);
        let svc = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            breaker
                .call(move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    svc.fetch().await
                })
                .await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) if err.is_circuit_open() => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_service_calls!(service, 2);
}

#[tokio::test]
async fn test_monitor_observes_full_recovery_cycle() {
    init_tracing();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);

    let registry = CircuitBreakerRegistry::new();
    let breaker = registry
        .get_or_create(
            "credentials",
            options(1, Duration::from_millis(30))
                .on_state_change(move |new, old| sink.lock().unwrap().push((new, old))),
        )
        .unwrap();
    let service = Arc::new(RecoveringService::new("credentials", 1));

    let svc = Arc::clone(&service);
    let _ = breaker.call(move || async move { svc.fetch().await }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let svc = Arc::clone(&service);
    let _ = breaker.call(move || async move { svc.fetch().await }).await;

    let seen = transitions.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (CircuitState::Open, CircuitState::Closed),
            (CircuitState::HalfOpen, CircuitState::Open),
            (CircuitState::Closed, CircuitState::HalfOpen),
        ]
    );
}

#[tokio::test]
async fn test_metrics_count_rejections_and_trips() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry
        .get_or_create("mail", options(1, Duration::from_secs(60)))
        .unwrap();
    let service = Arc::new(FailingService::new("mail"));

    let svc = Arc::clone(&service);
    let _ = breaker.call(move || async move { svc.fetch().await }).await;
    for _ in 0..3 {
        let svc = Arc::clone(&service);
        let _ = breaker.call(move || async move { svc.fetch().await }).await;
    }

    let snapshot = breaker.metrics().snapshot();
    assert_eq!(snapshot.total_failures, 1);
    assert_eq!(snapshot.total_rejected, 3);
    assert_eq!(snapshot.times_opened, 1);
    assert_service_calls!(service, 1);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["total_rejected"], 3);
}

#[tokio::test]
async fn test_reset_all_reopens_traffic() {
    let registry = CircuitBreakerRegistry::new();
    let llm = registry
        .get_or_create("llm", options(1, Duration::from_secs(60)))
        .unwrap();
    let mail = registry
        .get_or_create("mail", options(1, Duration::from_secs(60)))
        .unwrap();

    for breaker in [&llm, &mail] {
        let service = Arc::new(FailingService::new(breaker.name()));
        let svc = Arc::clone(&service);
        let _ = breaker.call(move || async move { svc.fetch().await }).await;
        assert!(breaker.is_open());
    }

    registry.reset_all();

    let service = Arc::new(HealthyService::new("llm"));
    let svc = Arc::clone(&service);
    let result = llm.call(move || async move { svc.fetch().await }).await;
    assert!(result.is_ok());
    assert_eq!(mail.state(), CircuitState::Closed);
}

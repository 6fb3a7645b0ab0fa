//! Fallback orchestration across a chain of scripted providers
//!
//! Covers priority ordering, retry classification, breaker and health
//! gating, and the overall deadline.

mod common;

use common::{harness, server_error, stt_chain, test_config, Behavior, KIND};
use futures::future::join_all;
use relay::orchestrator::{ProviderOutcome, ServedBy};
use relay::provider::{Params, Payload, ProviderDescriptor, ProviderError};
use relay::resilience::{CircuitState, ErrorClass};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_first_working_provider() {
    let h = harness(test_config(stt_chain()));
    h.script("stt-1").fail_with(server_error());
    h.script("stt-2").fail_with(ProviderError::Network("reset".into()));

    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();

    assert_eq!(response.served_by, ServedBy::Provider("stt-3".into()));
    assert_eq!(response.payload, Payload::from("stt-3:hello"));
    let visited: Vec<_> = response.attempts.iter().map(|r| r.provider.as_str()).collect();
    assert_eq!(visited, ["stt-1", "stt-2", "stt-3"]);

    // One breaker failure per provider, one success for the winner
    let breakers = h.orchestrator.breaker_metrics();
    assert_eq!(breakers["stt-1"].total_failures, 1);
    assert_eq!(breakers["stt-2"].total_failures, 1);
    assert_eq!(breakers["stt-3"].total_calls, 1);
    assert_eq!(breakers["stt-3"].total_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chain_reports_every_provider() {
    let mut config = test_config(stt_chain());
    config.retry.max_attempts = 3;
    let h = harness(config);
    for name in ["stt-1", "stt-2", "stt-3"] {
        h.script(name).fail_with(server_error());
    }

    let failure = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap_err();

    assert_eq!(failure.operation, "stt");
    assert_eq!(failure.reports.len(), 3);
    assert_eq!(failure.attempted().count(), 3);
    assert!(!failure.deadline_exceeded);
    for name in ["stt-1", "stt-2", "stt-3"] {
        match failure.outcome_of(name) {
            Some(ProviderOutcome::Failed {
                attempts, class, ..
            }) => {
                assert_eq!(*attempts, 3);
                assert_eq!(*class, ErrorClass::Transient);
            }
            other => panic!("unexpected outcome for {}: {:?}", name, other),
        }
        // Transient errors are retried up to the attempt budget
        assert_eq!(h.script(name).calls(), 3);
    }
    assert!(failure.to_string().contains("all 3 provider(s)"));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_not_retried() {
    let mut config = test_config(stt_chain());
    config.retry.max_attempts = 5;
    let h = harness(config);
    h.script("stt-1")
        .fail_with(ProviderError::Authentication("bad key".into()));

    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();

    assert_eq!(response.served_by, ServedBy::Provider("stt-2".into()));
    assert_eq!(h.script("stt-1").calls(), 1);
    assert!(matches!(
        response.attempts[0].outcome,
        ProviderOutcome::Failed {
            attempts: 1,
            class: ErrorClass::Permanent,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_all_open_breakers_skip_without_calls() {
    let mut config = test_config(stt_chain());
    config.circuit_breaker.failure_threshold = 1;
    let h = harness(config);
    for name in ["stt-1", "stt-2", "stt-3"] {
        h.script(name).fail_with(server_error());
    }

    // Trip every breaker
    h.orchestrator
        .execute("stt", Payload::from("first"), Params::new())
        .await
        .unwrap_err();
    for metrics in h.orchestrator.breaker_metrics().values() {
        assert!(matches!(metrics.state, CircuitState::Open { .. }));
    }
    let calls_before = h.total_calls();

    let failure = h
        .orchestrator
        .execute("stt", Payload::from("second"), Params::new())
        .await
        .unwrap_err();

    assert_eq!(failure.skipped().count(), 3);
    for name in ["stt-1", "stt-2", "stt-3"] {
        assert_eq!(
            failure.outcome_of(name),
            Some(&ProviderOutcome::SkippedCircuitOpen)
        );
    }
    assert_eq!(h.total_calls(), calls_before);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_provider_skipped() {
    let h = harness(test_config(stt_chain()));
    h.script("stt-1").set_healthy(false);

    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();

    assert_eq!(response.served_by, ServedBy::Provider("stt-2".into()));
    assert_eq!(response.attempts[0].outcome, ProviderOutcome::SkippedUnhealthy);
    assert_eq!(h.script("stt-1").calls(), 0);
    assert_eq!(h.orchestrator.breaker_metrics()["stt-1"].total_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_record_cached_within_ttl() {
    let h = harness(test_config(stt_chain()));

    for text in ["a", "b", "c"] {
        h.orchestrator
            .execute("stt", Payload::from(text), Params::new())
            .await
            .unwrap();
    }
    assert_eq!(h.script("stt-1").probes(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    h.orchestrator
        .execute("stt", Payload::from("d"), Params::new())
        .await
        .unwrap();
    assert_eq!(h.script("stt-1").probes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_health_gate_can_be_disabled() {
    let mut config = test_config(stt_chain());
    config.orchestrator.health_gate = false;
    let h = harness(config);
    h.script("stt-1").set_healthy(false);

    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();

    assert_eq!(response.served_by, ServedBy::Provider("stt-1".into()));
    assert_eq!(h.script("stt-1").probes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_provider_without_health_check_is_not_probed() {
    let providers = vec![
        ProviderDescriptor::new("stt-1", KIND, "stt", 0).without_health_check(),
        ProviderDescriptor::new("stt-2", KIND, "stt", 1),
    ];
    let h = harness(test_config(providers));
    h.script("stt-1").set_healthy(false);

    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();

    assert_eq!(response.served_by, ServedBy::Provider("stt-1".into()));
    assert_eq!(h.script("stt-1").probes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_abandons_slow_provider() {
    let mut config = test_config(stt_chain());
    config.orchestrator.deadline_ms = Some(100);
    let h = harness(config);
    h.script("stt-1").set(Behavior::Slow(Duration::from_secs(5)));

    let failure = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap_err();

    assert!(failure.deadline_exceeded);
    assert_eq!(
        failure.outcome_of("stt-1"),
        Some(&ProviderOutcome::DeadlineExceeded)
    );
    assert_eq!(
        failure.outcome_of("stt-2"),
        Some(&ProviderOutcome::SkippedDeadline)
    );
    assert_eq!(
        failure.outcome_of("stt-3"),
        Some(&ProviderOutcome::SkippedDeadline)
    );
    assert_eq!(h.script("stt-2").calls(), 0);

    // The deadline is the caller's budget, not a provider fault
    assert_eq!(h.orchestrator.breaker_metrics()["stt-1"].total_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_priority_not_declaration_order() {
    let providers = vec![
        ProviderDescriptor::new("backup", KIND, "tts", 10),
        ProviderDescriptor::new("primary", KIND, "tts", 1),
        ProviderDescriptor::new("retired", KIND, "tts", 0).disabled(),
    ];
    let h = harness(test_config(providers));

    let response = h
        .orchestrator
        .execute("tts", Payload::from("hi"), Params::new())
        .await
        .unwrap();

    assert_eq!(response.served_by, ServedBy::Provider("primary".into()));
    assert_eq!(h.script("retired").calls(), 0);
    assert_eq!(h.script("backup").calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_operation_has_no_providers() {
    let h = harness(test_config(stt_chain()));

    let failure = h
        .orchestrator
        .execute("translate", Payload::from("hola"), Params::new())
        .await
        .unwrap_err();

    assert!(failure.no_providers());
    assert_eq!(h.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_pools() {
    let mut config = test_config(stt_chain());
    config.pool.max_size = 2;
    let h = harness(config);
    h.script("stt-1").set(Behavior::Slow(Duration::from_millis(50)));

    let requests = (0..8).map(|i| {
        h.orchestrator
            .execute("stt", Payload::from(format!("req-{}", i)), Params::new())
    });
    let results = join_all(requests).await;

    for result in &results {
        let response = result.as_ref().unwrap();
        assert_eq!(response.served_by, ServedBy::Provider("stt-1".into()));
    }
    assert_eq!(h.script("stt-1").calls(), 8);

    let pools = h.orchestrator.pool_stats().await;
    assert!(pools["stt-1"].total <= 2);
}

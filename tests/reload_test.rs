//! Configuration loading and hot reload

mod common;

use common::{harness, server_error, stt_chain, test_config, KIND};
use relay::config::RelayConfig;
use relay::error::RelayError;
use relay::orchestrator::{FallbackOrchestrator, ProviderOutcome, ServedBy};
use relay::provider::{Params, Payload, ProviderDescriptor};
use relay::resilience::CircuitState;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[tokio::test(start_paused = true)]
async fn test_invalid_reload_keeps_previous_config() {
    let h = harness(test_config(stt_chain()));

    let mut broken = test_config(vec![
        ProviderDescriptor::new("dup", KIND, "stt", 0),
        ProviderDescriptor::new("dup", KIND, "stt", 1),
    ]);
    broken.cache.enabled = false;
    let err = h.orchestrator.reload(broken).await.unwrap_err();
    assert!(matches!(err, RelayError::Registry(_)));

    let mut out_of_range = test_config(stt_chain());
    out_of_range.retry.max_attempts = 0;
    assert!(matches!(
        h.orchestrator.reload(out_of_range).await,
        Err(RelayError::Config(_))
    ));

    // Old configuration still in force
    assert!(h.orchestrator.config().cache.enabled);
    assert_eq!(h.orchestrator.registry().snapshot().enabled_names().len(), 3);
    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();
    assert_eq!(response.served_by, ServedBy::Provider("stt-1".into()));
}

#[tokio::test(start_paused = true)]
async fn test_reload_prunes_removed_providers() {
    let h = harness(test_config(stt_chain()));
    h.script("stt-1").fail_with(server_error());
    h.orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();
    assert!(h.orchestrator.breaker_metrics().contains_key("stt-1"));

    let survivors = stt_chain().into_iter().skip(1).collect();
    h.orchestrator.reload(test_config(survivors)).await.unwrap();

    assert!(!h.orchestrator.breaker_metrics().contains_key("stt-1"));
    assert!(!h.orchestrator.health().is_registered("stt-1"));
    assert!(!h.orchestrator.pool_stats().await.contains_key("stt-1"));

    let response = h
        .orchestrator
        .execute("stt", Payload::from("again"), Params::new())
        .await
        .unwrap();
    assert_eq!(response.served_by, ServedBy::Provider("stt-2".into()));
    assert_eq!(response.attempts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reload_preserves_breaker_state_of_survivors() {
    let mut config = test_config(stt_chain());
    config.circuit_breaker.failure_threshold = 1;
    let h = harness(config.clone());
    h.script("stt-1").fail_with(server_error());
    h.orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();
    assert!(matches!(
        h.orchestrator.breaker_metrics()["stt-1"].state,
        CircuitState::Open { .. }
    ));

    // Same tunables, different cache settings
    config.cache.default_ttl_secs = 5;
    h.orchestrator.reload(config.clone()).await.unwrap();
    assert!(matches!(
        h.orchestrator.breaker_metrics()["stt-1"].state,
        CircuitState::Open { .. }
    ));

    // New tunables keep the state too
    config.circuit_breaker.failure_threshold = 2;
    h.orchestrator.reload(config).await.unwrap();
    let metrics = &h.orchestrator.breaker_metrics()["stt-1"];
    assert!(matches!(metrics.state, CircuitState::Open { .. }));
    assert_eq!(metrics.total_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_survives_recovery_timeout_change() {
    let mut config = test_config(stt_chain());
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.recovery_timeout_secs = 60;
    config.circuit_breaker.success_threshold = 1;
    config.cache.enabled = false;
    let h = harness(config.clone());
    h.script("stt-1").fail_with(server_error());
    h.orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();

    config.circuit_breaker.recovery_timeout_secs = 120;
    h.orchestrator.reload(config).await.unwrap();
    assert!(matches!(
        h.orchestrator.breaker_metrics()["stt-1"].state,
        CircuitState::Open { .. }
    ));

    // Still failing provider stays out of rotation until its probe time
    let response = h
        .orchestrator
        .execute("stt", Payload::from("again"), Params::new())
        .await
        .unwrap();
    assert_eq!(response.attempts[0].outcome, ProviderOutcome::SkippedCircuitOpen);
    assert_eq!(h.script("stt-1").calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reload_reorders_chain() {
    let h = harness(test_config(stt_chain()));

    let mut reordered = stt_chain();
    reordered[2].priority = -1;
    reordered[0].enabled = false;
    h.orchestrator.reload(test_config(reordered)).await.unwrap();
    h.orchestrator.clear_cache().await.unwrap();

    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();
    assert_eq!(response.served_by, ServedBy::Provider("stt-3".into()));
    assert_eq!(h.script("stt-1").calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_kind_after_reload_is_skipped() {
    let h = harness(test_config(stt_chain()));

    let mut providers = stt_chain();
    providers.insert(0, ProviderDescriptor::new("vendor-x", "not-registered", "stt", 0));
    h.orchestrator.reload(test_config(providers)).await.unwrap();

    let response = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();
    assert!(matches!(
        response.attempts[0].outcome,
        ProviderOutcome::ConfigurationError(_)
    ));
    assert_eq!(response.served_by, ServedBy::Provider("stt-1".into()));
}

#[tokio::test(start_paused = true)]
async fn test_orchestrator_from_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [retry]
        max_attempts = 1
        jitter_factor = 0.0

        [cache]
        default_ttl_secs = 120

        [[providers]]
        name = "fast"
        kind = "{kind}"
        operation = "tts"
        priority = 1

        [[providers]]
        name = "slow"
        kind = "{kind}"
        operation = "tts"
        priority = 2
        config = {{ voice = "alloy" }}
        "#,
        kind = KIND
    )
    .unwrap();

    let config = RelayConfig::from_file(file.path()).unwrap();
    assert_eq!(config.providers.len(), 2);
    assert_eq!(config.providers[1].config_str("voice"), Some("alloy"));

    let h = harness(config);
    let response = h
        .orchestrator
        .execute("tts", Payload::from("hi"), Params::new())
        .await
        .unwrap();
    assert_eq!(response.served_by, ServedBy::Provider("fast".into()));
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let config = RelayConfig {
        providers: vec![ProviderDescriptor::new("", KIND, "stt", 0)],
        ..Default::default()
    };
    assert!(FallbackOrchestrator::builder(config).build().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_metrics_exposition() {
    let h = harness(test_config(stt_chain()));
    h.script("stt-1").fail_with(server_error());

    for _ in 0..2 {
        h.orchestrator
            .execute("stt", Payload::from("hello"), Params::new())
            .await
            .unwrap();
    }

    let text = h.orchestrator.metrics_text().unwrap();
    assert!(text.contains("relay_provider_attempts_total"));
    assert!(text.contains("relay_cache_lookups_total"));
    assert!(text.contains("relay_breaker_state"));
    assert!(text.contains("relay_executions_total"));
    assert!(text.contains("stt-1"));
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_execution_keeps_its_settings() {
    let mut config = test_config(stt_chain());
    config.cache.default_ttl_secs = 60;
    let h = harness(config.clone());
    h.script("stt-1")
        .set(common::Behavior::Slow(Duration::from_secs(5)));

    let mut shorter = config;
    shorter.cache.default_ttl_secs = 10;
    let (response, reloaded) = tokio::join!(
        h.orchestrator
            .execute("stt", Payload::from("hello"), Params::new()),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.orchestrator.reload(shorter).await
        }
    );
    reloaded.unwrap();
    assert_eq!(
        response.unwrap().served_by,
        ServedBy::Provider("stt-1".into())
    );
    assert_eq!(h.orchestrator.config().cache.default_ttl_secs, 10);

    // Cached under the TTL in force when the execution started
    tokio::time::advance(Duration::from_secs(30)).await;
    let again = h
        .orchestrator
        .execute("stt", Payload::from("hello"), Params::new())
        .await
        .unwrap();
    assert_eq!(again.served_by, ServedBy::Cache);
}

//! Scripted providers shared by the integration tests
//!
//! Each provider name maps to a [`Script`] the test can flip between
//! succeeding, failing, hanging and reporting unhealthy while the
//! orchestrator is running.

#![allow(dead_code)]

use async_trait::async_trait;
use relay::config::RelayConfig;
use relay::orchestrator::{FallbackOrchestrator, OrchestratorBuilder};
use relay::provider::{
    OperationRequest, Payload, ProviderAdapter, ProviderConnection, ProviderDescriptor,
    ProviderError,
};
use relay::resilience::ProbeOutcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KIND: &str = "scripted";

/// What a scripted provider does on each call
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer with `"<provider>:<input text>"`
    Echo,
    Fail(ProviderError),
    /// Sleep before answering
    Slow(Duration),
}

pub struct Script {
    name: String,
    behavior: Mutex<Behavior>,
    healthy: AtomicBool,
    calls: AtomicUsize,
    probes: AtomicUsize,
}

impl Script {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Mutex::new(Behavior::Echo),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn fail_with(&self, error: ProviderError) {
        self.set(Behavior::Fail(error));
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Provider invocations so far, retries included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

struct ScriptedAdapter {
    script: Arc<Script>,
}

struct ScriptedConnection {
    script: Arc<Script>,
}

#[async_trait]
impl ProviderConnection for ScriptedConnection {
    async fn invoke(&mut self, request: &OperationRequest) -> Result<Payload, ProviderError> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.script.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Echo => Ok(echo(&self.script.name, &request.payload)),
            Behavior::Fail(error) => Err(error),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(echo(&self.script.name, &request.payload))
            }
        }
    }
}

fn echo(name: &str, payload: &Payload) -> Payload {
    Payload::Text(format!("{}:{}", name, payload.as_text().unwrap_or("<bytes>")))
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn connect(&self) -> Result<Box<dyn ProviderConnection>, ProviderError> {
        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
        }))
    }

    async fn health_probe(&self) -> Result<ProbeOutcome, ProviderError> {
        self.script.probes.fetch_add(1, Ordering::SeqCst);
        if self.script.healthy.load(Ordering::SeqCst) {
            Ok(ProbeOutcome::healthy())
        } else {
            Ok(ProbeOutcome::unhealthy("scripted outage"))
        }
    }
}

/// An orchestrator over scripted providers plus a handle on each script
pub struct Harness {
    pub orchestrator: FallbackOrchestrator,
    scripts: HashMap<String, Arc<Script>>,
}

impl Harness {
    pub fn script(&self, name: &str) -> &Arc<Script> {
        &self.scripts[name]
    }

    pub fn total_calls(&self) -> usize {
        self.scripts.values().map(|s| s.calls()).sum()
    }
}

/// Configuration tuned for tests: single attempt, no jitter, short delays
pub fn test_config(providers: Vec<ProviderDescriptor>) -> RelayConfig {
    let mut config = RelayConfig {
        providers,
        ..Default::default()
    };
    config.retry.max_attempts = 1;
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.retry.jitter_factor = 0.0;
    config
}

/// Providers `stt-1`, `stt-2`, `stt-3` for the `stt` operation, in that order
pub fn stt_chain() -> Vec<ProviderDescriptor> {
    (1..=3)
        .map(|i| ProviderDescriptor::new(format!("stt-{}", i), KIND, "stt", i))
        .collect()
}

pub fn harness(config: RelayConfig) -> Harness {
    harness_with(config, |builder| builder)
}

/// Like [`harness`], with extra builder setup (cache backend, dependencies)
pub fn harness_with(
    config: RelayConfig,
    customize: impl FnOnce(OrchestratorBuilder) -> OrchestratorBuilder,
) -> Harness {
    let scripts: HashMap<String, Arc<Script>> = config
        .providers
        .iter()
        .map(|d| (d.name.clone(), Script::new(&d.name)))
        .collect();

    let lookup = Arc::new(scripts.clone());
    let builder = FallbackOrchestrator::builder(config).constructor_fn(KIND, move |descriptor: ProviderDescriptor| {
            let script = lookup.get(&descriptor.name).cloned();
            async move {
                let script = script.ok_or_else(|| {
                    ProviderError::Configuration(format!("no script for {}", descriptor.name))
                })?;
                Ok(Arc::new(ScriptedAdapter { script }) as Arc<dyn ProviderAdapter>)
            }
        });
    let orchestrator = customize(builder).build().unwrap();

    Harness {
        orchestrator,
        scripts,
    }
}

pub fn server_error() -> ProviderError {
    ProviderError::Server {
        status: 503,
        message: "unavailable".to_string(),
    }
}

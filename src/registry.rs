//! Provider registry and factory
//!
//! Constructors are registered against a kind key (`"deepgram"`,
//! `"elevenlabs"`, ...). Descriptors loaded from configuration name a kind,
//! and the registry builds the adapter lazily on first use. Adding a new
//! provider type only needs a new constructor registration.
//!
//! Loaded descriptors live in an immutable [`RegistrySnapshot`]. A reload
//! builds a new snapshot and swaps it in; requests already holding entries
//! of the old snapshot finish against it undisturbed.

use crate::provider::{ProviderAdapter, ProviderDescriptor, ProviderError};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Constructor function type for provider adapters
pub type ProviderConstructor = Arc<
    dyn Fn(ProviderDescriptor) -> BoxFuture<'static, Result<Arc<dyn ProviderAdapter>, ProviderError>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`ProviderConstructor`]
pub fn constructor_fn<F, Fut>(f: F) -> ProviderConstructor
where
    F: Fn(ProviderDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn ProviderAdapter>, ProviderError>> + Send + 'static,
{
    Arc::new(
        move |descriptor| -> BoxFuture<'static, Result<Arc<dyn ProviderAdapter>, ProviderError>> {
            f(descriptor).boxed()
        },
    )
}

/// Errors raised by the provider registry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// No constructor registered for this kind
    #[error("Unknown provider kind '{kind}' for provider '{provider}'")]
    UnknownKind { provider: String, kind: String },

    /// Two descriptors share a name
    #[error("Duplicate provider name '{0}'")]
    DuplicateName(String),

    /// Descriptor is structurally invalid
    #[error("Invalid provider descriptor: {0}")]
    InvalidDescriptor(String),

    /// Constructor ran and failed
    #[error("Failed to construct provider '{provider}': {message}")]
    Construction { provider: String, message: String },

    /// Provider name is not in the current snapshot
    #[error("Provider '{0}' is not registered")]
    NotFound(String),
}

/// A loaded descriptor plus its lazily built adapter
pub struct ProviderEntry {
    descriptor: ProviderDescriptor,
    order: usize,
    constructor: Option<ProviderConstructor>,
    instance: OnceCell<Result<Arc<dyn ProviderAdapter>, RegistryError>>,
}

impl ProviderEntry {
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Position in the loaded configuration
    pub fn order(&self) -> usize {
        self.order
    }

    /// Get the adapter, constructing it on first call.
    ///
    /// The outcome is cached either way: a failed construction stays failed
    /// until the registry is reloaded.
    pub async fn instance(&self) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.instance
            .get_or_init(|| async {
                let Some(constructor) = self.constructor.clone() else {
                    return Err(RegistryError::UnknownKind {
                        provider: self.descriptor.name.clone(),
                        kind: self.descriptor.kind.clone(),
                    });
                };

                match constructor(self.descriptor.clone()).await {
                    Ok(adapter) => {
                        debug!(provider = %self.descriptor.name, "Provider adapter constructed");
                        Ok(adapter)
                    }
                    Err(e) => {
                        warn!(
                            provider = %self.descriptor.name,
                            error = %e,
                            "Provider construction failed, unavailable until reload"
                        );
                        Err(RegistryError::Construction {
                            provider: self.descriptor.name.clone(),
                            message: e.to_string(),
                        })
                    }
                }
            })
            .await
            .clone()
    }

    /// Whether construction has already been attempted
    pub fn is_constructed(&self) -> bool {
        self.instance.initialized()
    }

    /// Whether a constructor was registered for this entry's kind
    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("descriptor", &self.descriptor)
            .field("order", &self.order)
            .field("has_constructor", &self.constructor.is_some())
            .finish()
    }
}

/// Immutable view of the loaded providers
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    by_operation: HashMap<String, Vec<Arc<ProviderEntry>>>,
    by_name: HashMap<String, Arc<ProviderEntry>>,
    descriptors: Vec<ProviderDescriptor>,
}

impl RegistrySnapshot {
    /// Enabled providers for an operation, in fallback order
    pub fn ordered(&self, operation: &str) -> Vec<Arc<ProviderEntry>> {
        self.by_operation.get(operation).cloned().unwrap_or_default()
    }

    pub fn entry(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.by_name.get(name).cloned()
    }

    /// All loaded descriptors, disabled ones included, in load order
    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    /// Operation types with at least one enabled provider
    pub fn operations(&self) -> Vec<String> {
        let mut ops: Vec<String> = self.by_operation.keys().cloned().collect();
        ops.sort();
        ops
    }

    /// Names of the enabled providers
    pub fn enabled_names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    /// Enabled entries, in load order
    pub fn entries(&self) -> Vec<Arc<ProviderEntry>> {
        let mut entries: Vec<Arc<ProviderEntry>> = self.by_name.values().cloned().collect();
        entries.sort_by_key(|entry| entry.order);
        entries
    }
}

/// Registry of provider constructors and the currently loaded descriptors
///
/// # Example
///
/// ```no_run
/// use relay::registry::ProviderRegistry;
/// use relay::provider::ProviderDescriptor;
///
/// # async fn example() -> Result<(), relay::registry::RegistryError> {
/// let registry = ProviderRegistry::new();
///
/// // registry.register_fn("deepgram", |descriptor| async move {
/// //     let adapter = DeepgramAdapter::from_descriptor(&descriptor)?;
/// //     Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
/// // });
///
/// registry.load(vec![ProviderDescriptor::new("primary", "deepgram", "stt", 0)])?;
/// for entry in registry.get_ordered_providers("stt") {
///     let _adapter = entry.instance().await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct ProviderRegistry {
    constructors: RwLock<HashMap<String, ProviderConstructor>>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Register a constructor for a provider kind
    ///
    /// Takes effect for descriptors loaded afterwards.
    pub fn register(&self, kind: impl Into<String>, constructor: ProviderConstructor) {
        let kind = kind.into();
        debug!(kind = %kind, "Registering provider constructor");
        self.constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, constructor);
    }

    /// Register an async closure as the constructor for a kind
    pub fn register_fn<F, Fut>(&self, kind: impl Into<String>, f: F)
    where
        F: Fn(ProviderDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn ProviderAdapter>, ProviderError>> + Send + 'static,
    {
        self.register(kind, constructor_fn(f));
    }

    /// Check if a kind has a constructor
    pub fn has_kind(&self, kind: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    /// List registered kinds
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }

    /// Build a snapshot without installing it
    ///
    /// Structural problems (duplicate or empty names) reject the whole set.
    /// An unknown kind only makes that provider unavailable.
    pub fn prepare(
        &self,
        descriptors: Vec<ProviderDescriptor>,
    ) -> Result<RegistrySnapshot, RegistryError> {
        validate_descriptors(&descriptors)?;

        let constructors = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut snapshot = RegistrySnapshot::default();
        for (order, descriptor) in descriptors.iter().enumerate() {
            if !descriptor.enabled {
                continue;
            }
            let constructor = constructors.get(&descriptor.kind).cloned();
            if constructor.is_none() {
                warn!(
                    provider = %descriptor.name,
                    kind = %descriptor.kind,
                    "No constructor registered for provider kind"
                );
            }
            let entry = Arc::new(ProviderEntry {
                descriptor: descriptor.clone(),
                order,
                constructor,
                instance: OnceCell::new(),
            });
            snapshot
                .by_operation
                .entry(descriptor.operation.clone())
                .or_default()
                .push(entry.clone());
            snapshot.by_name.insert(descriptor.name.clone(), entry);
        }

        for chain in snapshot.by_operation.values_mut() {
            chain.sort_by_key(|entry| (entry.descriptor.priority, entry.order));
        }
        snapshot.descriptors = descriptors;

        Ok(snapshot)
    }

    /// Replace the loaded descriptors atomically
    pub fn load(&self, descriptors: Vec<ProviderDescriptor>) -> Result<(), RegistryError> {
        let snapshot = self.prepare(descriptors)?;
        self.install(Arc::new(snapshot));
        Ok(())
    }

    /// Install a snapshot built with [`Self::prepare`]
    pub fn install(&self, snapshot: Arc<RegistrySnapshot>) {
        info!(
            providers = snapshot.by_name.len(),
            operations = snapshot.by_operation.len(),
            "Provider registry loaded"
        );
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Enabled providers for an operation, lowest priority first, ties by
    /// load order
    pub fn get_ordered_providers(&self, operation: &str) -> Vec<Arc<ProviderEntry>> {
        self.snapshot().ordered(operation)
    }

    /// Get or lazily construct the adapter for a descriptor
    pub async fn get_or_create_instance(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        let entry = self
            .snapshot()
            .entry(&descriptor.name)
            .ok_or_else(|| RegistryError::NotFound(descriptor.name.clone()))?;
        entry.instance().await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural checks shared by config validation and loading
pub fn validate_descriptors(descriptors: &[ProviderDescriptor]) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor(
                "provider name must not be empty".to_string(),
            ));
        }
        if descriptor.kind.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor(format!(
                "provider '{}' has an empty kind",
                descriptor.name
            )));
        }
        if descriptor.operation.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor(format!(
                "provider '{}' has an empty operation",
                descriptor.name
            )));
        }
        if !seen.insert(descriptor.name.as_str()) {
            return Err(RegistryError::DuplicateName(descriptor.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{OperationRequest, Payload, ProviderConnection};
    use async_trait::async_trait;
    use relay_core_resilience::ProbeOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullAdapter;

    struct NullConnection;

    #[async_trait]
    impl ProviderConnection for NullConnection {
        async fn invoke(&mut self, request: &OperationRequest) -> Result<Payload, ProviderError> {
            Ok(request.payload.clone())
        }
    }

    #[async_trait]
    impl ProviderAdapter for NullAdapter {
        async fn connect(&self) -> Result<Box<dyn ProviderConnection>, ProviderError> {
            Ok(Box::new(NullConnection))
        }

        async fn health_probe(&self) -> Result<ProbeOutcome, ProviderError> {
            Ok(ProbeOutcome::healthy())
        }
    }

    fn registry_with_null() -> (ProviderRegistry, Arc<AtomicUsize>) {
        let registry = ProviderRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = counter.clone();
        registry.register_fn("null", move |descriptor: ProviderDescriptor| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if descriptor.config_str("api_key").is_some_and(|k| k.is_empty()) {
                    return Err(ProviderError::Configuration("api_key is empty".into()));
                }
                Ok(Arc::new(NullAdapter) as Arc<dyn ProviderAdapter>)
            }
        });
        (registry, counter)
    }

    fn names(entries: &[Arc<ProviderEntry>]) -> Vec<&str> {
        entries.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_ordering_by_priority_then_load_order() {
        let (registry, _) = registry_with_null();
        registry
            .load(vec![
                ProviderDescriptor::new("c", "null", "stt", 2),
                ProviderDescriptor::new("a", "null", "stt", 1),
                ProviderDescriptor::new("b", "null", "stt", 1),
                ProviderDescriptor::new("tts-1", "null", "tts", 0),
            ])
            .unwrap();

        let chain = registry.get_ordered_providers("stt");
        assert_eq!(names(&chain), vec!["a", "b", "c"]);
        assert_eq!(names(&registry.get_ordered_providers("tts")), vec!["tts-1"]);
        assert!(registry.get_ordered_providers("ocr").is_empty());
    }

    #[test]
    fn test_disabled_providers_are_excluded() {
        let (registry, _) = registry_with_null();
        registry
            .load(vec![
                ProviderDescriptor::new("a", "null", "stt", 0).disabled(),
                ProviderDescriptor::new("b", "null", "stt", 1),
            ])
            .unwrap();

        assert_eq!(names(&registry.get_ordered_providers("stt")), vec!["b"]);
        assert_eq!(registry.snapshot().descriptors().len(), 2);
    }

    #[test]
    fn test_duplicate_names_reject_whole_load() {
        let (registry, _) = registry_with_null();
        registry
            .load(vec![ProviderDescriptor::new("a", "null", "stt", 0)])
            .unwrap();

        let err = registry
            .load(vec![
                ProviderDescriptor::new("x", "null", "stt", 0),
                ProviderDescriptor::new("x", "null", "tts", 0),
            ])
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("x".into()));

        // Old snapshot stays active
        assert_eq!(names(&registry.get_ordered_providers("stt")), vec!["a"]);
    }

    #[tokio::test]
    async fn test_instance_is_constructed_once() {
        let (registry, counter) = registry_with_null();
        let descriptor = ProviderDescriptor::new("a", "null", "stt", 0);
        registry.load(vec![descriptor.clone()]).unwrap();

        registry.get_or_create_instance(&descriptor).await.unwrap();
        registry.get_or_create_instance(&descriptor).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_per_provider_error() {
        let (registry, _) = registry_with_null();
        registry
            .load(vec![
                ProviderDescriptor::new("ghost", "nonexistent", "stt", 0),
                ProviderDescriptor::new("real", "null", "stt", 1),
            ])
            .unwrap();

        let chain = registry.get_ordered_providers("stt");
        assert!(matches!(
            chain[0].instance().await,
            Err(RegistryError::UnknownKind { .. })
        ));
        assert!(chain[1].instance().await.is_ok());
    }

    #[tokio::test]
    async fn test_construction_failure_is_sticky_until_reload() {
        let (registry, counter) = registry_with_null();
        let bad = ProviderDescriptor::new("a", "null", "stt", 0)
            .with_config(serde_json::json!({"api_key": ""}));
        registry.load(vec![bad.clone()]).unwrap();

        for _ in 0..3 {
            let err = registry.get_or_create_instance(&bad).await.err().unwrap();
            assert!(matches!(err, RegistryError::Construction { .. }));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let fixed = bad.with_config(serde_json::json!({"api_key": "secret"}));
        registry.load(vec![fixed.clone()]).unwrap();
        assert!(registry.get_or_create_instance(&fixed).await.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_old_snapshot_entries_survive_reload() {
        let (registry, _) = registry_with_null();
        registry
            .load(vec![ProviderDescriptor::new("a", "null", "stt", 0)])
            .unwrap();
        let held = registry.get_ordered_providers("stt");

        registry.load(Vec::new()).unwrap();
        assert!(registry.get_ordered_providers("stt").is_empty());
        assert!(held[0].instance().await.is_ok());

        let missing = ProviderDescriptor::new("a", "null", "stt", 0);
        assert_eq!(
            registry.get_or_create_instance(&missing).await.err(),
            Some(RegistryError::NotFound("a".into()))
        );
    }

    #[test]
    fn test_empty_fields_are_invalid() {
        let result = validate_descriptors(&[ProviderDescriptor::new("", "null", "stt", 0)]);
        assert!(matches!(result, Err(RegistryError::InvalidDescriptor(_))));
        let result = validate_descriptors(&[ProviderDescriptor::new("a", "null", " ", 0)]);
        assert!(matches!(result, Err(RegistryError::InvalidDescriptor(_))));
    }
}

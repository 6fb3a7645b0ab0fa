//! Provider adapter contract and descriptors
//!
//! Every external service (one speech-to-text vendor, one text-to-speech
//! vendor, ...) is wrapped in a [`ProviderAdapter`]. The engine only ever
//! talks to this contract:
//!
//! - [`ProviderAdapter::connect`] opens a transport handle that the
//!   connection manager pools and reuses
//! - [`ProviderConnection::invoke`] performs one call over that handle
//! - [`ProviderAdapter::health_probe`] reports the service's health
//!
//! Adapters report failures as [`ProviderError`], which classifies itself
//! into an [`ErrorClass`] for retry decisions.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use relay_core_resilience::{ErrorClass, ProbeOutcome, ResilienceError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Request parameters. Sorted keys keep fingerprints deterministic.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Opaque input or output value of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Raw bytes (audio, images); base64 when serialized
    Bytes(#[serde(serialize_with = "encode_b64", deserialize_with = "decode_b64")] Vec<u8>),
    /// UTF-8 text
    Text(String),
    /// Structured value
    Json(serde_json::Value),
}

impl Payload {
    /// Default normalization used for fingerprinting.
    ///
    /// Bytes are used as-is, text as UTF-8, and JSON as its compact
    /// encoding (object keys are sorted by `serde_json::Map`).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Json(value) => value.to_string().into_bytes(),
        }
    }

    /// Size of the payload body in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
            Payload::Json(value) => value.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

fn encode_b64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn decode_b64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// One call handed to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Logical operation type, e.g. `stt` or `tts`
    pub operation: String,
    pub payload: Payload,
    pub params: Params,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>, payload: Payload) -> Self {
        Self {
            operation: operation.into(),
            payload,
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Configuration identity of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique provider name, also the breaker, pool and health key
    pub name: String,

    /// Constructor key in the registry, e.g. `deepgram`
    pub kind: String,

    /// Operation type this provider serves
    pub operation: String,

    /// Lower runs first
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Register this provider's probe with the health checker
    #[serde(default = "default_true")]
    pub health_check: bool,

    /// Opaque adapter configuration
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

fn default_true() -> bool {
    true
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ProviderDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        operation: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            operation: operation.into(),
            priority,
            enabled: true,
            health_check: true,
            config: empty_config(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn without_health_check(mut self) -> Self {
        self.health_check = false;
        self
    }

    /// Read a string field from the opaque config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Errors reported by provider adapters
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The call exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// No pooled connection became available in time
    #[error("Timed out after {0:?} waiting for a connection")]
    PoolTimeout(Duration),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Provider asked us to slow down
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Provider returned an HTTP-style status
    #[error("Provider returned status {status}: {message}")]
    Server { status: u16, message: String },

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request rejected as invalid
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Adapter is misconfigured
    #[error("Provider misconfigured: {0}")]
    Configuration(String),

    /// Transport is no longer usable
    #[error("Connection broken: {0}")]
    ConnectionBroken(String),
}

impl ProviderError {
    /// Classify for retry decisions
    pub fn classify(&self) -> ErrorClass {
        match self {
            ProviderError::Timeout(_)
            | ProviderError::PoolTimeout(_)
            | ProviderError::Network(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::ConnectionBroken(_) => ErrorClass::Transient,
            ProviderError::Server { status, .. } => match status {
                408 | 429 | 500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            ProviderError::Authentication(_) | ProviderError::Validation(_) => {
                ErrorClass::Permanent
            }
            ProviderError::Configuration(_) => ErrorClass::Configuration,
        }
    }

    /// Whether the connection that produced this error must be discarded
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::Network(_) | ProviderError::ConnectionBroken(_)
        )
    }

    /// Minimum wait the provider asked for, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<ResilienceError> for ProviderError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::AcquireTimeout(waited) => ProviderError::PoolTimeout(waited),
            ResilienceError::Timeout(after) => ProviderError::Timeout(after),
            ResilienceError::ConnectionRejected(msg) => ProviderError::Authentication(msg),
            ResilienceError::Configuration(msg) => ProviderError::Configuration(msg),
            ResilienceError::Factory { error, .. } => match error.downcast_ref::<ProviderError>() {
                Some(original) => original.clone(),
                None => ProviderError::Network(error.to_string()),
            },
            other => ProviderError::Network(other.to_string()),
        }
    }
}

impl From<ProviderError> for ResilienceError {
    fn from(err: ProviderError) -> Self {
        ResilienceError::factory(err.classify(), err)
    }
}

/// A live transport handle to a provider
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    /// Perform one call
    async fn invoke(&mut self, request: &OperationRequest) -> Result<Payload, ProviderError>;

    /// Whether the handle can be returned to the pool
    fn is_usable(&self) -> bool {
        true
    }
}

/// Adapter wrapping one external service
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Open a new transport handle
    async fn connect(&self) -> Result<Box<dyn ProviderConnection>, ProviderError>;

    /// Check the service's health
    async fn health_probe(&self) -> Result<ProbeOutcome, ProviderError>;

    /// Per-call timeout; `None` uses the engine default
    fn request_timeout(&self) -> Option<Duration> {
        None
    }
}

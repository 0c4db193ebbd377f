//! Logging and trace export
//!
//! Every bulwark process logs JSON through one `tracing` subscriber. When an
//! OTLP collector is configured, spans are also exported with W3C trace
//! context so a dial, a tunnel lookup and the monitor of the resulting
//! connection can be followed across processes.
//!
//! Disconnect audit records are logged through the same subscriber on the
//! `bulwark::audit` target, so the filter must keep that target at `info`.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::EnvConfig;

/// Filter used when neither the config nor `RUST_LOG` sets one
pub const DEFAULT_LOG_FILTER: &str =
    "info,bulwark=debug,bulwark::audit=info,kube=info,tower=warn,hyper=warn";

/// Env var naming the OTLP collector
pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Env var holding bulwark-specific log filter directives
pub const ENV_LOG_FILTER: &str = "BULWARK_LOG";

/// Pod metadata injected through the downward API, as resource attributes
const POD_ATTRIBUTES: [(&str, &str); 4] = [
    ("POD_NAME", "k8s.pod.name"),
    ("POD_NAMESPACE", "k8s.namespace.name"),
    ("NODE_NAME", "k8s.node.name"),
    ("CONTAINER_NAME", "k8s.container.name"),
];

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The span exporter could not be built
    #[error("failed to initialize tracer: {0}")]
    TracerInit(String),

    /// The filter was invalid or a global subscriber is already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Telemetry settings for one process
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name reported with every span (e.g. "bulwark-proxy")
    pub service_name: String,

    /// Server identity, reported as `bulwark.server.id`
    pub server_id: Option<String>,

    /// OTLP collector (e.g. "http://otel-collector:4317"); logs only when unset
    pub otlp_endpoint: Option<String>,

    /// Filter directives; `RUST_LOG`, then [`DEFAULT_LOG_FILTER`], when unset
    pub log_filter: Option<String>,

    /// Pod metadata and other resource attributes
    pub resource_attributes: Vec<(String, String)>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "bulwark".to_string(),
            server_id: None,
            otlp_endpoint: None,
            log_filter: None,
            resource_attributes: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    /// Settings for `service_name` with collector, filter and pod metadata
    /// read from `env`
    pub fn from_env(service_name: impl Into<String>, env: &dyn EnvConfig) -> Self {
        let set = |key: &str| env.var(key).filter(|v| !v.is_empty());
        Self {
            service_name: service_name.into(),
            server_id: None,
            otlp_endpoint: set(ENV_OTLP_ENDPOINT),
            log_filter: set(ENV_LOG_FILTER),
            resource_attributes: POD_ATTRIBUTES
                .iter()
                .filter_map(|(var, attr)| set(var).map(|v| (attr.to_string(), v)))
                .collect(),
        }
    }

    /// Report `server_id` with every span
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        match &self.log_filter {
            Some(directives) => EnvFilter::try_new(directives)
                .map_err(|e| TelemetryError::SubscriberInit(e.to_string())),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))),
        }
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new(SERVICE_NAME, self.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ];
        if let Some(server_id) = &self.server_id {
            attributes.push(KeyValue::new("bulwark.server.id", server_id.clone()));
        }
        attributes.extend(
            self.resource_attributes
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
        );
        Resource::new(attributes)
    }
}

/// Flushes exported spans when dropped
///
/// Hold it for the lifetime of the process.
#[must_use = "spans are only flushed while the guard is alive"]
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to flush spans");
            }
        }
    }
}

/// Install the global subscriber described by `config`
///
/// ```ignore
/// use bulwark_common::config::OsEnv;
/// use bulwark_common::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _telemetry = init_telemetry(
///     TelemetryConfig::from_env("bulwark-proxy", &OsEnv).with_server_id("node-1"),
/// )?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = config.env_filter()?;

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => Some(otlp_tracer_provider(endpoint, config.resource())?),
        None => None,
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    if let Some(provider) = &provider {
        global::set_text_map_propagator(TraceContextPropagator::new());
        global::set_tracer_provider(provider.clone());
    }

    Ok(TelemetryGuard { provider })
}

fn otlp_tracer_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build())
}

//! Process-wide tracing setup for the `tradpoints` binary and embedders.
//!
//! Log lines always go to stderr so command output on stdout stays
//! machine-readable. With the `otel` feature, spans can also be exported
//! over OTLP/HTTP.

use thiserror::Error;
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub const DEFAULT_SERVICE_NAME: &str = "tradpoints";
pub const DEFAULT_FILTER: &str = "tradpoints=info,warn";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter {filter:?}: {message}")]
    Filter { filter: String, message: String },
    #[cfg(feature = "otel")]
    #[error("otlp span exporter: {0}")]
    Exporter(String),
    #[error("tracing subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    /// Filter directives; `RUST_LOG` wins when set, then this, then
    /// [`DEFAULT_FILTER`].
    pub filter: Option<String>,
    pub json_logs: bool,
    #[cfg(feature = "otel")]
    pub export_spans: bool,
    #[cfg(feature = "otel")]
    pub service_name: Option<String>,
    /// OTLP/HTTP endpoint. The exporter's own default applies when unset.
    #[cfg(feature = "otel")]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryOptions {
    fn env_filter(&self) -> Result<tracing_subscriber::EnvFilter, TelemetryError> {
        if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
            .unwrap_or(DEFAULT_FILTER);
        tracing_subscriber::EnvFilter::try_new(directives).map_err(|err| TelemetryError::Filter {
            filter: directives.to_string(),
            message: err.to_string(),
        })
    }

    #[cfg(feature = "otel")]
    fn service_name(&self) -> String {
        self.service_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SERVICE_NAME)
            .to_string()
    }
}

/// Keeps the span exporter alive; dropping it flushes pending ledger spans.
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn exports_spans(&self) -> bool {
        #[cfg(feature = "otel")]
        {
            self.provider.is_some()
        }
        #[cfg(not(feature = "otel"))]
        {
            false
        }
    }
}

#[cfg(feature = "otel")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("tradpoints: span export shutdown failed: {err}");
            }
        }
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_telemetry(options: &TelemetryOptions) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = options.env_filter()?;
    let fmt_layer = if options.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    #[cfg(feature = "otel")]
    {
        let provider = if options.export_spans {
            Some(span_provider(options)?)
        } else {
            None
        };
        let otel_layer = provider.as_ref().map(|provider| {
            use opentelemetry::trace::TracerProvider as _;
            tracing_opentelemetry::layer().with_tracer(provider.tracer(options.service_name()))
        });
        subscriber.with(otel_layer).try_init()?;
        Ok(TelemetryGuard { provider })
    }

    #[cfg(not(feature = "otel"))]
    {
        subscriber.try_init()?;
        Ok(TelemetryGuard::default())
    }
}

#[cfg(feature = "otel")]
fn span_provider(
    options: &TelemetryOptions,
) -> Result<opentelemetry_sdk::trace::SdkTracerProvider, TelemetryError> {
    use opentelemetry_otlp::WithExportConfig as _;

    let mut exporter = opentelemetry_otlp::SpanExporter::builder().with_http();
    if let Some(endpoint) = options.otlp_endpoint.as_deref() {
        exporter = exporter.with_endpoint(endpoint.to_string());
    }
    let exporter = exporter
        .build()
        .map_err(|err| TelemetryError::Exporter(err.to_string()))?;

    let resource = opentelemetry_sdk::Resource::builder_empty()
        .with_service_name(options.service_name())
        .with_attribute(opentelemetry::KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        ))
        .build();
    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

//! Logging, tracing and metrics setup.
//!
//! [`Telemetry`] installs the global `tracing` subscriber: an [`EnvFilter`]
//! (from `RUST_LOG`, falling back to the configured level) and a console fmt
//! layer. When `OTEL_EXPORTER_OTLP_*` variables are present, spans and
//! metrics are also exported over OTLP. Events carrying a
//! `monotonic_counter.*` field (for example the per-outcome transfer counter)
//! become `OpenTelemetry` counters through the metrics layer.
//!
//! Only available with the `telemetry` feature.

use std::env;
use std::time::Duration;

use axum::http::{Request, Response};
use opentelemetry::trace::{Status, TracerProvider};
use opentelemetry::{KeyValue, Value, global};
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider},
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnRequest, MakeSpan, OnResponse, TraceLayer};
use tracing::Span;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer, OpenTelemetrySpanExt};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between OTLP metric exports.
const METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Env var value, or the programmatic fallback.
fn resolve_env(env_key: &str, fallback: Option<&Value>) -> Option<Value> {
    env::var(env_key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(Value::from)
        .or_else(|| fallback.cloned())
}

/// OTLP transport selected by the environment; `None` when OTLP is off.
fn detect_protocol() -> Option<OtlpProtocol> {
    let is_enabled = ["ENDPOINT", "HEADERS", "PROTOCOL"]
        .iter()
        .any(|suffix| env::var(format!("OTEL_EXPORTER_OTLP_{suffix}")).is_ok());
    is_enabled.then(|| match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
        Ok("grpc") => OtlpProtocol::Grpc,
        _ => OtlpProtocol::Http,
    })
}

#[derive(Debug, Clone, Copy)]
enum OtlpProtocol {
    Http,
    Grpc,
}

/// Service identity and log level for the global subscriber.
///
/// `OTEL_SERVICE_NAME`, `OTEL_SERVICE_VERSION` and `OTEL_SERVICE_DEPLOYMENT`
/// override the programmatic values.
#[derive(Debug, Default)]
pub struct Telemetry {
    name: Option<Value>,
    version: Option<Value>,
    deployment: Option<Value>,
    log_level: Option<String>,
}

impl Telemetry {
    /// Empty identity, `info` level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Value>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the service version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<Value>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the deployment environment name.
    #[must_use]
    pub fn with_deployment(mut self, deployment: impl Into<Value>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    /// Filter used when `RUST_LOG` is not set, e.g. `"polywallet=debug,info"`.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    fn resource(&self) -> Resource {
        let name = resolve_env("OTEL_SERVICE_NAME", self.name.as_ref());
        let version = resolve_env("OTEL_SERVICE_VERSION", self.version.as_ref());
        let deployment = resolve_env("OTEL_SERVICE_DEPLOYMENT", self.deployment.as_ref());

        let mut builder = Resource::builder();
        if let Some(name) = name {
            builder = builder.with_service_name(name);
        }
        let attributes: Vec<KeyValue> = [
            version.map(|v| KeyValue::new(SERVICE_VERSION, v)),
            deployment.map(|d| KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, d)),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !attributes.is_empty() {
            builder = builder.with_schema_url(attributes, SCHEMA_URL);
        }
        builder.build()
    }

    fn init_tracer(&self, protocol: OtlpProtocol) -> Option<SdkTracerProvider> {
        let exporter = match protocol {
            OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .build(),
            OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .build(),
        };
        let exporter = exporter.ok()?;

        Some(
            SdkTracerProvider::builder()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(self.resource())
                .with_batch_exporter(exporter)
                .build(),
        )
    }

    fn init_meter(&self, protocol: OtlpProtocol) -> Option<SdkMeterProvider> {
        let exporter = match protocol {
            OtlpProtocol::Http => opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .build(),
            OtlpProtocol::Grpc => opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .build(),
        };
        let exporter = exporter.ok()?;

        let reader = PeriodicReader::builder(exporter)
            .with_interval(METRICS_INTERVAL)
            .build();
        let stdout_reader =
            PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build();

        let provider = MeterProviderBuilder::default()
            .with_resource(self.resource())
            .with_reader(reader)
            .with_reader(stdout_reader)
            .build();
        global::set_meter_provider(provider.clone());
        Some(provider)
    }

    /// Install the global subscriber.
    ///
    /// Returns a [`TelemetryGuard`] that flushes exporters on drop; keep it
    /// alive for the lifetime of the process.
    pub fn register(self) -> TelemetryGuard {
        let protocol = detect_protocol();
        let (tracer_provider, meter_provider) = protocol.map_or((None, None), |p| {
            (self.init_tracer(p), self.init_meter(p))
        });

        let otel_layer = tracer_provider
            .as_ref()
            .map(|tp| OpenTelemetryLayer::new(tp.tracer(env!("CARGO_PKG_NAME"))));
        let metrics_layer = meter_provider
            .as_ref()
            .map(|mp| MetricsLayer::new(mp.clone()));

        let fallback = self.log_level.as_deref().unwrap_or("info");
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
            .with(tracing_subscriber::fmt::layer())
            .with(metrics_layer)
            .with(otel_layer)
            .init();

        if protocol.is_some() {
            tracing::info!("OpenTelemetry exporters registered");
        } else {
            tracing::info!("OpenTelemetry is not configured, console logging only");
        }

        TelemetryGuard {
            tracer_provider,
            meter_provider,
        }
    }
}

/// Flushes and shuts down the exporters on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(ref tp) = self.tracer_provider
            && let Err(err) = tp.shutdown()
        {
            tracing::error!(?err, "tracer provider shutdown error");
        }
        if let Some(ref mp) = self.meter_provider
            && let Err(err) = mp.shutdown()
        {
            tracing::error!(?err, "meter provider shutdown error");
        }
    }
}

/// `tower-http` trace layer producing one span per API request.
pub type HttpTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    DefaultOnRequest,
    HttpOnResponse,
>;

impl TelemetryGuard {
    /// Trace layer for the HTTP API.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn http_tracing(&self) -> HttpTraceLayer {
        TraceLayer::new_for_http()
            .make_span_with(HttpMakeSpan)
            .on_response(HttpOnResponse)
    }
}

/// User id from a `/users/{user_id}/...` path.
fn path_user_id(path: &str) -> Option<&str> {
    path.strip_prefix("/users/")?
        .split('/')
        .next()
        .filter(|id| !id.is_empty())
}

/// Names request spans after method and path and tags them with the user.
#[derive(Clone, Copy, Debug)]
pub struct HttpMakeSpan;

impl<A> MakeSpan<A> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<A>) -> Span {
        let path = request.uri().path();
        tracing::info_span!(
            "http_request",
            otel.kind = "server",
            otel.name = %format!("{} {path}", request.method()),
            method = %request.method(),
            uri = %request.uri(),
            user_id = path_user_id(path).unwrap_or_default(),
            status = tracing::field::Empty,
        )
    }
}

/// Records status and latency on the request span.
#[derive(Clone, Copy, Debug)]
pub struct HttpOnResponse;

impl<A> OnResponse<A> for HttpOnResponse {
    fn on_response(self, response: &Response<A>, latency: Duration, span: &Span) {
        let status = response.status();
        span.record("status", status.as_u16());

        if status.is_success() {
            span.set_status(Status::Ok);
        } else {
            span.set_status(Status::error(
                status.canonical_reason().unwrap_or("unknown").to_owned(),
            ));
        }

        tracing::info!(
            status = status.as_u16(),
            elapsed_ms = latency.as_millis(),
            "request finished"
        );
    }
}

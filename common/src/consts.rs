use std::time::Duration;

// environment inputs for the generated Instrumentation resource
pub const IGNORE_NAMESPACES_ENV: &str = "IGNORE_NAMESPACES";
pub const COLLECTOR_ENDPOINT_ENV: &str = "COLLECTOR_ENDPOINT";
pub const OTLP_HEADERS_ENV: &str = "OTEL_EXPORTER_OTLP_HEADERS";
pub const TRACES_SAMPLER_ENV: &str = "OTEL_TRACES_SAMPLER";
pub const TRACES_SAMPLER_ARG_ENV: &str = "OTEL_TRACES_SAMPLER_ARG";

// environment inputs for the controller itself
pub const WORKERS_ENV: &str = "INJECTOR_WORKERS";
pub const RECONCILE_TIMEOUT_ENV: &str = "INJECTOR_RECONCILE_TIMEOUT_SECS";
pub const RETRY_MAX_DELAY_ENV: &str = "INJECTOR_RETRY_MAX_DELAY_SECS";
pub const INJECTOR_OTLP_ENDPOINT_ENV: &str = "INJECTOR_OTLP_ENDPOINT";

pub const DEFAULT_COLLECTOR_ENDPOINT: &str =
    "http://simplest-collector.default.svc.cluster.local:4318";
pub const DEFAULT_AUTH_HEADER: &str = "Authorization=Basic x";
pub const DEFAULT_SAMPLER_TYPE: &str = "parentbased_traceidratio";
pub const DEFAULT_SAMPLER_ARGUMENT: &str = "1.0";

pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

/// Delay attached to the first retry directive after a failed create.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);
/// Base delay the dispatcher uses to redeliver a failed reconciliation.
pub const ERROR_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Sampler names understood by the OpenTelemetry operator.
pub const SUPPORTED_SAMPLERS: &[&str] = &[
    "always_on",
    "always_off",
    "traceidratio",
    "parentbased_always_on",
    "parentbased_always_off",
    "parentbased_traceidratio",
    "jaeger_remote",
    "parentbased_jaeger_remote",
    "xray",
];

/// Samplers whose argument is a probability.
pub const RATIO_SAMPLERS: &[&str] = &["traceidratio", "parentbased_traceidratio"];

// Instrumentation resource identity
pub const INSTRUMENTATION_GROUP: &str = "opentelemetry.io";
pub const INSTRUMENTATION_VERSION: &str = "v1alpha1";
pub const INSTRUMENTATION_API_VERSION: &str = "opentelemetry.io/v1alpha1";
pub const INSTRUMENTATION_KIND: &str = "Instrumentation";
pub const INSTRUMENTATION_NAME: &str = "auto-instrumentation";

// env var names written into the resource
pub const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const OTLP_HEADERS_VAR: &str = "OTEL_EXPORTER_OTLP_HEADERS";
pub const TRACES_SAMPLER_VAR: &str = "OTEL_TRACES_SAMPLER";
pub const DOTNET_INSTRUMENTATIONS_VAR: &str = "OTEL_DOTNET_AUTO_TRACES_ENABLED_INSTRUMENTATIONS";
pub const DOTNET_INSTRUMENTATIONS: &str = "AspNetCore,HttpClient,GrpcClient,SqlClient";

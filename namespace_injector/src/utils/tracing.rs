use std::fmt;
use std::sync::OnceLock;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::SdkTracerProvider, Resource};
use time::macros::format_description;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format, time::FormatTime, FmtContext, FormatEvent, FormatFields, FormattedFields,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use common::configuration::Tracing;

const SERVICE_NAME: &str = "namespace-injector";

struct BracketedTime;

impl FormatTime for BracketedTime {
    fn format_time(&self, w: &mut format::Writer<'_>) -> fmt::Result {
        let now = time::OffsetDateTime::now_utc();
        let formatted = now
            .format(&format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| fmt::Error)?;
        write!(w, "[{}]", formatted)
    }
}

/// Pulls `namespace=<value>` out of formatted span fields.
fn namespace_field(fields: &str) -> Option<&str> {
    let start = fields.find("namespace=")?;
    let rest = &fields[start + "namespace=".len()..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(&rest[..end])
}

struct BracketedFormatter;

impl<S, N> FormatEvent<S, N> for BracketedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        BracketedTime.format_time(&mut writer)?;

        write!(
            writer,
            "[{}]",
            event.metadata().level().to_string().to_lowercase()
        )?;

        // namespace from the enclosing reconcile span, if any
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                    if let Some(namespace) = namespace_field(fields.fields.as_str()) {
                        write!(writer, " namespace={}", namespace)?;
                        break;
                    }
                }
            }
        }

        write!(writer, " ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

static INIT_LOGGER: OnceLock<SdkTracerProvider> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    // no ANSI to keep fields parseable
    tracing_subscriber::fmt::layer()
        .event_format(BracketedFormatter)
        .fmt_fields(format::DefaultFields::new())
        .with_ansi(false)
}

fn build_exporting_provider(endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("unable to create OTLP span exporter for {endpoint}: {err}");
            return None;
        }
    };

    let resource = Resource::builder().with_service_name(SERVICE_NAME).build();
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build(),
    )
}

/// Installs the global subscriber. Spans are exported over OTLP when an
/// endpoint is configured; logs always go to stdout.
pub fn init_tracer(tracing_config: &Tracing) -> &'static SdkTracerProvider {
    INIT_LOGGER.get_or_init(|| {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let exporting = tracing_config
            .otlp_endpoint
            .as_deref()
            .and_then(build_exporting_provider);
        eprintln!(
            "initializing tracing: export_enabled={}, otlp_endpoint={:?}",
            exporting.is_some(),
            tracing_config.otlp_endpoint
        );

        match exporting {
            Some(provider) => {
                global::set_tracer_provider(provider.clone());

                let telemetry_layer =
                    tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME));

                tracing_subscriber::registry()
                    .with(telemetry_layer)
                    .with(env_filter())
                    .with(fmt_layer())
                    .init();

                provider
            }
            None => {
                // export disabled, use no-op provider
                let provider = SdkTracerProvider::builder().build();
                global::set_tracer_provider(provider.clone());

                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(fmt_layer())
                    .init();

                provider
            }
        }
    })
}

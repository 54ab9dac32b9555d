mod constants;

pub use constants::{error, k8s, reconcile};

use common::consts::{INSTRUMENTATION_KIND, INSTRUMENTATION_NAME};
use opentelemetry::KeyValue;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::reconciler::{Outcome, ReconcileError};

/// Span attributes describing a finished reconciliation.
pub fn outcome_attributes(namespace: &str, failures: u32, outcome: &Outcome) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(k8s::NAMESPACE_NAME, namespace.to_string()),
        KeyValue::new(k8s::RESOURCE_KIND, INSTRUMENTATION_KIND),
        KeyValue::new(k8s::RESOURCE_NAME, INSTRUMENTATION_NAME),
        KeyValue::new(reconcile::ATTEMPT, i64::from(failures) + 1),
        KeyValue::new(reconcile::OUTCOME, outcome.as_str()),
    ];

    match outcome {
        Outcome::Done => {}
        Outcome::Skip(reason) => {
            attributes.push(KeyValue::new(reconcile::SKIP_REASON, reason.as_str()));
        }
        Outcome::RetryScheduled(delay) => {
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            attributes.push(KeyValue::new(reconcile::RETRY_DELAY_MS, delay_ms));
        }
        Outcome::Failed(err) => {
            let error_type = match err {
                ReconcileError::Read(_) => "read",
                ReconcileError::Cancelled => "cancelled",
                ReconcileError::DeadlineExceeded => "deadline_exceeded",
            };
            attributes.push(KeyValue::new(error::TYPE, error_type));
            attributes.push(KeyValue::new(error::MESSAGE, err.to_string()));
        }
    }

    attributes
}

/// Attaches the outcome of a reconciliation to its span so exported traces can
/// be filtered by outcome.
pub fn record_outcome(span: &tracing::Span, namespace: &str, failures: u32, outcome: &Outcome) {
    for attribute in outcome_attributes(namespace, failures, outcome) {
        span.set_attribute(attribute.key, attribute.value);
    }
}

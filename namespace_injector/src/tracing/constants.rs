/// OpenTelemetry attribute keys attached to reconcile spans
///
/// Kubernetes keys follow the OTEL semantic conventions.
/// See: https://opentelemetry.io/docs/specs/semconv/resource/k8s/

// =============================================================================
// Span Attributes - Kubernetes
// =============================================================================

pub mod k8s {
    /// Name of the namespace being reconciled
    /// Example: "team-a"
    pub const NAMESPACE_NAME: &str = "k8s.namespace.name";

    /// Kind of the managed resource
    pub const RESOURCE_KIND: &str = "k8s.resource.kind";

    /// Name of the managed resource
    /// Example: "auto-instrumentation"
    pub const RESOURCE_NAME: &str = "k8s.resource.name";
}

// =============================================================================
// Span Attributes - Reconciliation
// =============================================================================

pub mod reconcile {
    /// Terminal state of the pipeline
    /// Example: "done", "skip", "retry_scheduled", "failed"
    pub const OUTCOME: &str = "reconcile.outcome";

    /// Why a run ended without writing
    /// Example: "excluded", "already_present", "namespace_gone"
    pub const SKIP_REASON: &str = "reconcile.skip_reason";

    /// 1-based attempt number for the namespace
    pub const ATTEMPT: &str = "reconcile.attempt";

    /// Delay attached to a retry directive, in milliseconds
    pub const RETRY_DELAY_MS: &str = "reconcile.retry_delay_ms";
}

// =============================================================================
// Span Attributes - Error Handling
// =============================================================================

pub mod error {
    /// Type of the error
    /// Example: "read", "cancelled", "deadline_exceeded"
    pub const TYPE: &str = "error.type";

    /// Error message
    pub const MESSAGE: &str = "error.message";
}

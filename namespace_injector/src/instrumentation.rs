//! Typed model of the `opentelemetry.io/v1alpha1` Instrumentation resource
//! and the builder that derives it from the injector configuration.

use common::configuration::InjectorConfig;
use common::consts::{
    DOTNET_INSTRUMENTATIONS, DOTNET_INSTRUMENTATIONS_VAR, INSTRUMENTATION_API_VERSION,
    INSTRUMENTATION_KIND, INSTRUMENTATION_NAME, OTLP_ENDPOINT_VAR, OTLP_HEADERS_VAR,
    TRACES_SAMPLER_VAR,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrumentation {
    pub api_version: String,
    pub kind: String,
    pub metadata: InstrumentationMetadata,
    pub spec: InstrumentationSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationSpec {
    pub exporter: Exporter,
    pub propagators: Vec<Propagator>,
    pub sampler: Sampler,
    pub env: Vec<EnvVar>,
    pub python: RuntimeOverrides,
    pub dotnet: RuntimeOverrides,
    pub java: RuntimeOverrides,
    pub nodejs: RuntimeOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exporter {
    pub endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Propagator {
    TraceContext,
    Baggage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sampler {
    #[serde(rename = "type")]
    pub sampler_type: String,
    pub argument: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Per-language block of the spec. Every runtime gets its own env list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOverrides {
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Python,
    DotNet,
    Java,
    NodeJs,
}

impl Runtime {
    fn overrides(self, config: &InjectorConfig) -> RuntimeOverrides {
        let mut env = vec![EnvVar::new(OTLP_ENDPOINT_VAR, &config.collector_endpoint)];
        if self == Runtime::DotNet {
            env.push(EnvVar::new(
                DOTNET_INSTRUMENTATIONS_VAR,
                DOTNET_INSTRUMENTATIONS,
            ));
        }
        RuntimeOverrides { env }
    }
}

impl Instrumentation {
    /// Canonical JSON form of the resource. The Kubernetes adapter decodes
    /// this into the object it posts to the API server.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builds the Instrumentation resource for `namespace`. The result depends
/// only on the arguments.
pub fn build_instrumentation(config: &InjectorConfig, namespace: &str) -> Instrumentation {
    Instrumentation {
        api_version: INSTRUMENTATION_API_VERSION.to_string(),
        kind: INSTRUMENTATION_KIND.to_string(),
        metadata: InstrumentationMetadata {
            name: INSTRUMENTATION_NAME.to_string(),
            namespace: namespace.to_string(),
        },
        spec: InstrumentationSpec {
            exporter: Exporter {
                endpoint: config.collector_endpoint.clone(),
            },
            propagators: vec![Propagator::TraceContext, Propagator::Baggage],
            sampler: Sampler {
                sampler_type: config.sampler_type.clone(),
                argument: config.sampler_argument.clone(),
            },
            env: vec![
                EnvVar::new(OTLP_HEADERS_VAR, &config.auth_header_value),
                EnvVar::new(TRACES_SAMPLER_VAR, &config.sampler_type),
            ],
            python: Runtime::Python.overrides(config),
            dotnet: Runtime::DotNet.overrides(config),
            java: Runtime::Java.overrides(config),
            nodejs: Runtime::NodeJs.overrides(config),
        },
    }
}

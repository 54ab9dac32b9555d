use std::collections::BTreeSet;
use std::time::Duration;

use url::Url;

use crate::consts::{
    COLLECTOR_ENDPOINT_ENV, DEFAULT_AUTH_HEADER, DEFAULT_COLLECTOR_ENDPOINT,
    DEFAULT_RECONCILE_TIMEOUT, DEFAULT_RETRY_MAX_DELAY, DEFAULT_SAMPLER_ARGUMENT,
    DEFAULT_SAMPLER_TYPE, DEFAULT_WORKERS, IGNORE_NAMESPACES_ENV, INJECTOR_OTLP_ENDPOINT_ENV,
    OTLP_HEADERS_ENV, RATIO_SAMPLERS, RECONCILE_TIMEOUT_ENV, RETRY_DELAY, RETRY_MAX_DELAY_ENV,
    SUPPORTED_SAMPLERS, TRACES_SAMPLER_ARG_ENV, TRACES_SAMPLER_ENV, WORKERS_ENV,
};
use crate::errors::ConfigError;

/// Values written into every generated Instrumentation resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorConfig {
    pub collector_endpoint: String,
    pub auth_header_value: String,
    pub sampler_type: String,
    pub sampler_argument: String,
    pub ignored_namespaces: BTreeSet<String>,
}

impl InjectorConfig {
    pub fn is_ignored(&self, namespace: &str) -> bool {
        self.ignored_namespaces.contains(namespace)
    }
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            collector_endpoint: DEFAULT_COLLECTOR_ENDPOINT.to_string(),
            auth_header_value: DEFAULT_AUTH_HEADER.to_string(),
            sampler_type: DEFAULT_SAMPLER_TYPE.to_string(),
            sampler_argument: DEFAULT_SAMPLER_ARGUMENT.to_string(),
            ignored_namespaces: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub workers: usize,
    pub reconcile_timeout: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

/// Export settings for the injector's own spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tracing {
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    pub injector: InjectorConfig,
    pub controller: ControllerSettings,
    pub tracing: Tracing,
}

impl Configuration {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Values are
    /// trimmed, and blank values are treated the same as missing ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let injector = InjectorConfig {
            collector_endpoint: get(COLLECTOR_ENDPOINT_ENV)
                .unwrap_or_else(|| DEFAULT_COLLECTOR_ENDPOINT.to_string()),
            auth_header_value: get(OTLP_HEADERS_ENV)
                .unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string()),
            sampler_type: get(TRACES_SAMPLER_ENV)
                .unwrap_or_else(|| DEFAULT_SAMPLER_TYPE.to_string()),
            sampler_argument: get(TRACES_SAMPLER_ARG_ENV)
                .unwrap_or_else(|| DEFAULT_SAMPLER_ARGUMENT.to_string()),
            ignored_namespaces: get(IGNORE_NAMESPACES_ENV)
                .map(|list| parse_namespace_list(&list))
                .unwrap_or_default(),
        };
        validate_collector_endpoint(&injector.collector_endpoint)?;
        validate_sampler(&injector.sampler_type, &injector.sampler_argument)?;

        let workers = match get(WORKERS_ENV) {
            Some(value) => parse_setting::<usize>(WORKERS_ENV, &value)?,
            None => DEFAULT_WORKERS,
        };
        if workers == 0 {
            return Err(ConfigError::InvalidSetting {
                key: WORKERS_ENV,
                value: workers.to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        let reconcile_timeout = match get(RECONCILE_TIMEOUT_ENV) {
            Some(value) => {
                Duration::from_secs(parse_setting::<u64>(RECONCILE_TIMEOUT_ENV, &value)?)
            }
            None => DEFAULT_RECONCILE_TIMEOUT,
        };
        if reconcile_timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                key: RECONCILE_TIMEOUT_ENV,
                value: "0".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }

        let retry_max_delay = match get(RETRY_MAX_DELAY_ENV) {
            Some(value) => {
                Duration::from_secs(parse_setting::<u64>(RETRY_MAX_DELAY_ENV, &value)?)
            }
            None => DEFAULT_RETRY_MAX_DELAY,
        };
        if retry_max_delay < RETRY_DELAY {
            return Err(ConfigError::InvalidSetting {
                key: RETRY_MAX_DELAY_ENV,
                value: retry_max_delay.as_secs().to_string(),
                reason: format!("must be at least {}s", RETRY_DELAY.as_secs()),
            });
        }

        Ok(Self {
            injector,
            controller: ControllerSettings {
                workers,
                reconcile_timeout,
                retry_max_delay,
            },
            tracing: Tracing {
                otlp_endpoint: get(INJECTOR_OTLP_ENDPOINT_ENV),
            },
        })
    }
}

/// Splits a comma separated namespace list, trimming whitespace and dropping
/// empty entries.
pub fn parse_namespace_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_collector_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCollectorEndpoint {
        value: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

fn validate_sampler(sampler: &str, argument: &str) -> Result<(), ConfigError> {
    if !SUPPORTED_SAMPLERS.contains(&sampler) {
        return Err(ConfigError::UnsupportedSampler(sampler.to_string()));
    }
    if RATIO_SAMPLERS.contains(&sampler) {
        let ratio_ok = argument
            .parse::<f64>()
            .map(|ratio| (0.0..=1.0).contains(&ratio))
            .unwrap_or(false);
        if !ratio_ok {
            return Err(ConfigError::InvalidSamplerArgument {
                sampler: sampler.to_string(),
                argument: argument.to_string(),
            });
        }
    }
    Ok(())
}

fn parse_setting<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidSetting {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = Configuration::from_lookup(|_| None).unwrap();
        assert_eq!(config, Configuration::default());
        assert_eq!(
            config.injector.collector_endpoint,
            "http://simplest-collector.default.svc.cluster.local:4318"
        );
        assert_eq!(config.injector.auth_header_value, "Authorization=Basic x");
        assert_eq!(config.injector.sampler_type, "parentbased_traceidratio");
        assert_eq!(config.injector.sampler_argument, "1.0");
        assert!(config.injector.ignored_namespaces.is_empty());
        assert_eq!(config.controller.workers, 1);
        assert_eq!(config.tracing.otlp_endpoint, None);
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = Configuration::from_lookup(lookup_from(&[
            ("COLLECTOR_ENDPOINT", ""),
            ("OTEL_TRACES_SAMPLER", ""),
            ("IGNORE_NAMESPACES", ""),
        ]))
        .unwrap();
        assert_eq!(config.injector, InjectorConfig::default());
    }

    #[test]
    fn test_ignore_list_is_trimmed() {
        let config = Configuration::from_lookup(lookup_from(&[(
            "IGNORE_NAMESPACES",
            " kube-system, kube-public ,,monitoring ",
        )]))
        .unwrap();
        let ignored: Vec<&str> = config
            .injector
            .ignored_namespaces
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(ignored, vec!["kube-public", "kube-system", "monitoring"]);
        assert!(config.injector.is_ignored("kube-system"));
        assert!(!config.injector.is_ignored(" kube-system"));
        assert!(!config.injector.is_ignored(""));
    }

    #[test]
    fn test_values_are_trimmed_before_use() {
        let config = Configuration::from_lookup(lookup_from(&[
            ("COLLECTOR_ENDPOINT", "  http://otel.observability:4318 \n"),
            ("OTEL_TRACES_SAMPLER", " traceidratio "),
            ("OTEL_TRACES_SAMPLER_ARG", " 0.5 "),
            ("INJECTOR_WORKERS", " 2 "),
            ("INJECTOR_OTLP_ENDPOINT", "   "),
        ]))
        .unwrap();
        assert_eq!(
            config.injector.collector_endpoint,
            "http://otel.observability:4318"
        );
        assert_eq!(config.injector.sampler_type, "traceidratio");
        assert_eq!(config.injector.sampler_argument, "0.5");
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.tracing.otlp_endpoint, None);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Configuration::from_lookup(lookup_from(&[
            ("COLLECTOR_ENDPOINT", "https://otel.example.com:4318"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "Authorization=Bearer abc"),
            ("OTEL_TRACES_SAMPLER", "traceidratio"),
            ("OTEL_TRACES_SAMPLER_ARG", "0.25"),
            ("INJECTOR_WORKERS", "4"),
            ("INJECTOR_RECONCILE_TIMEOUT_SECS", "5"),
            ("INJECTOR_RETRY_MAX_DELAY_SECS", "60"),
            ("INJECTOR_OTLP_ENDPOINT", "http://localhost:4317"),
        ]))
        .unwrap();
        assert_eq!(
            config.injector.collector_endpoint,
            "https://otel.example.com:4318"
        );
        assert_eq!(config.injector.auth_header_value, "Authorization=Bearer abc");
        assert_eq!(config.injector.sampler_type, "traceidratio");
        assert_eq!(config.injector.sampler_argument, "0.25");
        assert_eq!(
            config.controller,
            ControllerSettings {
                workers: 4,
                reconcile_timeout: Duration::from_secs(5),
                retry_max_delay: Duration::from_secs(60),
            }
        );
        assert_eq!(
            config.tracing.otlp_endpoint.as_deref(),
            Some("http://localhost:4317")
        );
    }

    #[test]
    fn test_rejects_non_http_collector() {
        let err = Configuration::from_lookup(lookup_from(&[(
            "COLLECTOR_ENDPOINT",
            "ftp://collector:4318",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCollectorEndpoint { .. }));

        let err =
            Configuration::from_lookup(lookup_from(&[("COLLECTOR_ENDPOINT", "collector:4318")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCollectorEndpoint { .. }));
    }

    #[test]
    fn test_rejects_unknown_sampler() {
        let err =
            Configuration::from_lookup(lookup_from(&[("OTEL_TRACES_SAMPLER", "sometimes")]))
                .unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedSampler("sometimes".to_string()));
    }

    #[test]
    fn test_ratio_sampler_argument_is_checked() {
        let err =
            Configuration::from_lookup(lookup_from(&[("OTEL_TRACES_SAMPLER_ARG", "1.5")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSamplerArgument { .. }));

        // non ratio samplers pass their argument through untouched
        let config = Configuration::from_lookup(lookup_from(&[
            ("OTEL_TRACES_SAMPLER", "jaeger_remote"),
            (
                "OTEL_TRACES_SAMPLER_ARG",
                "endpoint=http://localhost:14250,pollingIntervalMs=5000",
            ),
        ]))
        .unwrap();
        assert_eq!(config.injector.sampler_type, "jaeger_remote");
    }

    #[test]
    fn test_invalid_controller_settings() {
        let err = Configuration::from_lookup(lookup_from(&[("INJECTOR_WORKERS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                key: "INJECTOR_WORKERS",
                ..
            }
        ));

        let err = Configuration::from_lookup(lookup_from(&[("INJECTOR_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));

        let err = Configuration::from_lookup(lookup_from(&[(
            "INJECTOR_RETRY_MAX_DELAY_SECS",
            "5",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                key: "INJECTOR_RETRY_MAX_DELAY_SECS",
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("IGNORE_NAMESPACES", "kube-system,kube-public");
        std::env::set_var("COLLECTOR_ENDPOINT", "http://collector.observability:4318");

        let config = Configuration::from_env().unwrap();

        std::env::remove_var("IGNORE_NAMESPACES");
        std::env::remove_var("COLLECTOR_ENDPOINT");

        assert!(config.injector.is_ignored("kube-public"));
        assert_eq!(
            config.injector.collector_endpoint,
            "http://collector.observability:4318"
        );
    }
}

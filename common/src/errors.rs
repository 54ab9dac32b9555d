use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid collector endpoint `{value}`: {reason}")]
    InvalidCollectorEndpoint { value: String, reason: String },
    #[error("unsupported sampler type `{0}`")]
    UnsupportedSampler(String),
    #[error("sampler `{sampler}` expects a ratio between 0 and 1, got `{argument}`")]
    InvalidSamplerArgument { sampler: String, argument: String },
    #[error("invalid value `{value}` for {key}: {reason}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        reason: String,
    },
}

// -----------------------------------------------------------------------------
// Startup errors. These end the process and are never fed to the reconcile loop.
// -----------------------------------------------------------------------------
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unable to connect to the cluster: {0}")]
    ClusterConnection(String),

    #[error("{api} is not queryable: {reason}")]
    MissingApi { api: String, reason: String },
}

use async_trait::async_trait;
use thiserror::Error;

use crate::instrumentation::Instrumentation;

pub mod kubernetes;
pub mod memory;

/// Error types for cluster API calls
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// API server rejected or failed the call (connectivity, auth, 5xx, ...)
    #[error("{operation} failed (code={code:?}): {message}")]
    Api {
        operation: &'static str,
        code: Option<u16>,
        message: String,
    },

    /// Create raced with another writer
    #[error("instrumentation {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },
}

impl ClusterError {
    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        ClusterError::Api {
            operation,
            code: None,
            message: message.into(),
        }
    }
}

/// The subset of the cluster API the reconciler needs.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Whether the namespace still exists
    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Whether an Instrumentation called `name` exists in `namespace`
    async fn instrumentation_exists(&self, namespace: &str, name: &str)
        -> Result<bool, ClusterError>;

    /// Create the resource exactly as given
    async fn create_instrumentation(&self, resource: &Instrumentation) -> Result<(), ClusterError>;
}

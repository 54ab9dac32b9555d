//! Cluster access through the Kubernetes API server.

use async_trait::async_trait;
use common::consts::{INSTRUMENTATION_GROUP, INSTRUMENTATION_KIND, INSTRUMENTATION_VERSION};
use common::errors::StartupError;
use futures::{future, stream, Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::{debug, info, warn};

use super::{ClusterApi, ClusterError};
use crate::event_filter::{EventClassifier, NamespaceEvent};
use crate::instrumentation::Instrumentation;

pub struct KubeCluster {
    client: Client,
    namespaces: Api<Namespace>,
    instrumentation_resource: ApiResource,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(
            INSTRUMENTATION_GROUP,
            INSTRUMENTATION_VERSION,
            INSTRUMENTATION_KIND,
        );
        Self {
            namespaces: Api::all(client.clone()),
            instrumentation_resource: ApiResource::from_gvk(&gvk),
            client,
        }
    }

    fn instrumentations(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.instrumentation_resource)
    }

    /// Verifies at startup that namespaces can be read and that the
    /// Instrumentation API is installed, so misconfiguration ends the process
    /// instead of surfacing as endless reconcile failures.
    pub async fn preflight(&self) -> Result<(), StartupError> {
        let probe = ListParams::default().limit(1);

        self.namespaces
            .list_metadata(&probe)
            .await
            .map_err(|e| StartupError::ClusterConnection(e.to_string()))?;

        let all_instrumentations: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &self.instrumentation_resource);
        all_instrumentations
            .list_metadata(&probe)
            .await
            .map_err(|e| StartupError::MissingApi {
                api: format!(
                    "{}.{}",
                    self.instrumentation_resource.plural, INSTRUMENTATION_GROUP
                ),
                reason: e.to_string(),
            })?;

        info!(
            api_version = %self.instrumentation_resource.api_version,
            "cluster preflight passed"
        );
        Ok(())
    }
}

fn api_error(operation: &'static str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => ClusterError::Api {
            operation,
            code: Some(response.code),
            message: response.message,
        },
        other => ClusterError::api(operation, other.to_string()),
    }
}

fn create_error(resource: &Instrumentation, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 409 => ClusterError::AlreadyExists {
            namespace: resource.metadata.namespace.clone(),
            name: resource.metadata.name.clone(),
        },
        other => api_error("create instrumentation", other),
    }
}

/// Decodes the canonical JSON of `resource` into the object posted to the
/// API server.
fn to_dynamic_object(resource: &Instrumentation) -> Result<DynamicObject, ClusterError> {
    let encoded = resource
        .to_json()
        .map_err(|e| ClusterError::api("encode instrumentation", e.to_string()))?;
    serde_json::from_str(&encoded)
        .map_err(|e| ClusterError::api("encode instrumentation", e.to_string()))
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let namespace = self
            .namespaces
            .get_opt(name)
            .await
            .map_err(|e| api_error("get namespace", e))?;
        Ok(namespace.is_some())
    }

    async fn instrumentation_exists(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ClusterError> {
        let existing = self
            .instrumentations(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error("get instrumentation", e))?;
        Ok(existing.is_some())
    }

    async fn create_instrumentation(&self, resource: &Instrumentation) -> Result<(), ClusterError> {
        let object = to_dynamic_object(resource)?;
        self.instrumentations(&resource.metadata.namespace)
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| create_error(resource, e))?;
        Ok(())
    }
}

/// Watches namespaces and yields classified lifecycle events, mirroring every
/// watch event into the returned store first. Watch errors are logged and
/// retried with the watcher's default backoff.
pub fn namespace_events(
    client: Client,
) -> (
    Store<Namespace>,
    impl Stream<Item = NamespaceEvent> + Send + 'static,
) {
    let api: Api<Namespace> = Api::all(client);
    let (store, writer) = reflector::store();
    let mut classifier = EventClassifier::default();

    let events = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .filter_map(|event| {
            future::ready(match event {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(error = %err, "namespace watch error");
                    None
                }
            })
        })
        .flat_map(move |event| {
            let events = classifier.classify(event);
            if !events.is_empty() {
                debug!(count = events.len(), "classified namespace events");
            }
            stream::iter(events)
        });
    (store, events)
}

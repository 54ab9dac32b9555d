use super::{ClusterApi, ClusterError};
use crate::instrumentation::Instrumentation;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A call observed by [`MemoryCluster`], in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    GetNamespace(String),
    GetInstrumentation { namespace: String, name: String },
    CreateInstrumentation { namespace: String, name: String },
}

#[derive(Default)]
struct MemoryState {
    namespaces: BTreeSet<String>,
    instrumentations: BTreeMap<(String, String), Instrumentation>,
    calls: Vec<ClusterCall>,
    failing_reads: u32,
    failing_creates: u32,
    stall_creates: bool,
}

/// In-memory cluster backend
/// Records every call and can be told to fail or stall, which makes it the
/// test double for the reconciler and the controller.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_namespaces(names: &[&str]) -> Self {
        let cluster = Self::new();
        for name in names {
            cluster.add_namespace(name).await;
        }
        cluster
    }

    pub async fn add_namespace(&self, name: &str) {
        self.state.write().await.namespaces.insert(name.to_string());
    }

    pub async fn remove_namespace(&self, name: &str) {
        let mut state = self.state.write().await;
        state.namespaces.remove(name);
        state.instrumentations.retain(|(ns, _), _| ns != name);
    }

    /// Stores a resource without recording a call, as if created by someone else.
    pub async fn insert_instrumentation(&self, resource: Instrumentation) {
        let key = (
            resource.metadata.namespace.clone(),
            resource.metadata.name.clone(),
        );
        self.state.write().await.instrumentations.insert(key, resource);
    }

    /// The next `count` reads fail with an API error.
    pub async fn fail_next_reads(&self, count: u32) {
        self.state.write().await.failing_reads = count;
    }

    /// The next `count` creates fail with an API error.
    pub async fn fail_next_creates(&self, count: u32) {
        self.state.write().await.failing_creates = count;
    }

    /// Creates never complete while set.
    pub async fn stall_creates(&self, stall: bool) {
        self.state.write().await.stall_creates = stall;
    }

    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn create_calls(&self) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|call| matches!(call, ClusterCall::CreateInstrumentation { .. }))
            .count()
    }

    pub async fn instrumentations_in(&self, namespace: &str) -> Vec<Instrumentation> {
        self.state
            .read()
            .await
            .instrumentations
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    fn take_read_failure(
        state: &mut MemoryState,
        operation: &'static str,
    ) -> Result<(), ClusterError> {
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ClusterError::Api {
                operation,
                code: Some(503),
                message: "injected read failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.write().await;
        state.calls.push(ClusterCall::GetNamespace(name.to_string()));
        Self::take_read_failure(&mut state, "get namespace")?;
        Ok(state.namespaces.contains(name))
    }

    async fn instrumentation_exists(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ClusterError> {
        let mut state = self.state.write().await;
        state.calls.push(ClusterCall::GetInstrumentation {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Self::take_read_failure(&mut state, "get instrumentation")?;
        Ok(state
            .instrumentations
            .contains_key(&(namespace.to_string(), name.to_string())))
    }

    async fn create_instrumentation(&self, resource: &Instrumentation) -> Result<(), ClusterError> {
        let namespace = resource.metadata.namespace.clone();
        let name = resource.metadata.name.clone();

        let stall = {
            let mut state = self.state.write().await;
            state.calls.push(ClusterCall::CreateInstrumentation {
                namespace: namespace.clone(),
                name: name.clone(),
            });
            state.stall_creates
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.write().await;
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(ClusterError::Api {
                operation: "create instrumentation",
                code: Some(500),
                message: "injected create failure".to_string(),
            });
        }

        let key = (namespace.clone(), name.clone());
        if state.instrumentations.contains_key(&key) {
            return Err(ClusterError::AlreadyExists { namespace, name });
        }

        debug!(namespace = %namespace, name = %name, "memory cluster stored instrumentation");
        state.instrumentations.insert(key, resource.clone());
        Ok(())
    }
}

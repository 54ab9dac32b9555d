//! The per-namespace decision pipeline.
//!
//! `ExclusionCheck → NamespaceCheck → ExistenceCheck → Build → Create`, ending
//! in one [`Outcome`]. Every step before `Create` is read-only and `Create`
//! is gated on the resource being absent, so the pipeline can be re-run from
//! the start as often as the dispatcher likes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::configuration::InjectorConfig;
use common::consts::INSTRUMENTATION_NAME;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterApi, ClusterError};
use crate::instrumentation::build_instrumentation;
use crate::retry::Backoff;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("cluster read failed: {0}")]
    Read(ClusterError),
    #[error("reconciliation cancelled")]
    Cancelled,
    #[error("reconciliation deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Excluded,
    AlreadyPresent,
    NamespaceGone,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Excluded => "excluded",
            SkipReason::AlreadyPresent => "already_present",
            SkipReason::NamespaceGone => "namespace_gone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The resource was created by this run
    Done,
    Skip(SkipReason),
    /// The create failed; run the pipeline again after the delay
    RetryScheduled(Duration),
    Failed(ReconcileError),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Done => "done",
            Outcome::Skip(_) => "skip",
            Outcome::RetryScheduled(_) => "retry_scheduled",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// One invocation of the pipeline for a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub namespace: String,
    /// Consecutive failures already recorded for this namespace.
    pub failures: u32,
}

impl ReconcileRequest {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            failures: 0,
        }
    }

    pub fn with_failures(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }
}

/// Caller-supplied cancellation and deadline for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    pub fn with_timeout(cancel: CancellationToken, timeout: Duration) -> Self {
        Self::new(cancel, Some(Instant::now() + timeout))
    }

    /// Runs `fut` unless the token fires or the deadline passes first.
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, ReconcileError> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReconcileError::Cancelled),
            _ = deadline => Err(ReconcileError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

pub struct Reconciler {
    config: Arc<InjectorConfig>,
    cluster: Arc<dyn ClusterApi>,
    write_backoff: Backoff,
}

impl Reconciler {
    pub fn new(
        config: Arc<InjectorConfig>,
        cluster: Arc<dyn ClusterApi>,
        write_backoff: Backoff,
    ) -> Self {
        Self {
            config,
            cluster,
            write_backoff,
        }
    }

    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.config.is_ignored(namespace)
    }

    pub async fn reconcile(&self, request: &ReconcileRequest, ctx: &RunContext) -> Outcome {
        match self.run(request, ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match &err {
                    ReconcileError::Read(cause) => error!(
                        namespace = %request.namespace,
                        error = %cause,
                        "unable to read cluster state"
                    ),
                    _ => warn!(
                        namespace = %request.namespace,
                        error = %err,
                        "reconciliation aborted"
                    ),
                }
                Outcome::Failed(err)
            }
        }
    }

    async fn run(
        &self,
        request: &ReconcileRequest,
        ctx: &RunContext,
    ) -> Result<Outcome, ReconcileError> {
        let namespace = request.namespace.as_str();

        if self.is_excluded(namespace) {
            info!(namespace = %namespace, "namespace in ignore list, skipping");
            return Ok(Outcome::Skip(SkipReason::Excluded));
        }

        let namespace_exists = ctx
            .guard(self.cluster.namespace_exists(namespace))
            .await?
            .map_err(ReconcileError::Read)?;
        if !namespace_exists {
            info!(namespace = %namespace, "namespace no longer exists, skipping");
            return Ok(Outcome::Skip(SkipReason::NamespaceGone));
        }

        let present = ctx
            .guard(
                self.cluster
                    .instrumentation_exists(namespace, INSTRUMENTATION_NAME),
            )
            .await?
            .map_err(ReconcileError::Read)?;
        if present {
            info!(namespace = %namespace, "instrumentation already exists, skipping");
            return Ok(Outcome::Skip(SkipReason::AlreadyPresent));
        }

        let resource = build_instrumentation(&self.config, namespace);
        debug!(namespace = %namespace, "built instrumentation resource");

        match ctx
            .guard(self.cluster.create_instrumentation(&resource))
            .await?
        {
            Ok(()) => {
                info!(namespace = %namespace, "instrumentation created");
                Ok(Outcome::Done)
            }
            Err(ClusterError::AlreadyExists { .. }) => {
                info!(namespace = %namespace, "instrumentation created concurrently, skipping");
                Ok(Outcome::Skip(SkipReason::AlreadyPresent))
            }
            Err(err) => {
                let delay = self.write_backoff.delay(request.failures);
                warn!(
                    namespace = %namespace,
                    error = %err,
                    retry_in_secs = delay.as_secs(),
                    "unable to create instrumentation"
                );
                Ok(Outcome::RetryScheduled(delay))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{ClusterCall, MemoryCluster};
    use common::configuration::{parse_namespace_list, Configuration};
    use pretty_assertions::assert_eq;

    fn reconciler_for(cluster: &MemoryCluster, config: InjectorConfig) -> Reconciler {
        Reconciler::new(
            Arc::new(config),
            Arc::new(cluster.clone()),
            Backoff::default(),
        )
    }

    #[tokio::test]
    async fn test_scenario_a_creates_with_defaults() {
        let config = Configuration::from_lookup(|_| None).unwrap().injector;
        let cluster = MemoryCluster::with_namespaces(&["team-a"]).await;
        let reconciler = reconciler_for(&cluster, config);

        let outcome = reconciler
            .reconcile(&ReconcileRequest::new("team-a"), &RunContext::default())
            .await;

        assert_eq!(outcome, Outcome::Done);
        let created = cluster.instrumentations_in("team-a").await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].metadata.name, "auto-instrumentation");
        assert_eq!(
            created[0].spec.exporter.endpoint,
            "http://simplest-collector.default.svc.cluster.local:4318"
        );
        assert_eq!(created[0].spec.sampler.sampler_type, "parentbased_traceidratio");
        assert_eq!(created[0].spec.sampler.argument, "1.0");
    }

    #[tokio::test]
    async fn test_scenario_b_excluded_namespace_makes_no_calls() {
        let config = InjectorConfig {
            ignored_namespaces: parse_namespace_list("kube-system,kube-public"),
            ..InjectorConfig::default()
        };
        let cluster = MemoryCluster::with_namespaces(&["kube-system"]).await;
        let reconciler = reconciler_for(&cluster, config);

        for _ in 0..3 {
            let outcome = reconciler
                .reconcile(&ReconcileRequest::new("kube-system"), &RunContext::default())
                .await;
            assert_eq!(outcome, Outcome::Skip(SkipReason::Excluded));
        }
        assert!(cluster.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_c_existing_resource_is_left_alone() {
        let cluster = MemoryCluster::with_namespaces(&["team-b"]).await;
        let mut existing = build_instrumentation(&InjectorConfig::default(), "team-b");
        existing.spec.sampler.argument = "0.5".to_string();
        cluster.insert_instrumentation(existing.clone()).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());

        let outcome = reconciler
            .reconcile(&ReconcileRequest::new("team-b"), &RunContext::default())
            .await;

        assert_eq!(outcome, Outcome::Skip(SkipReason::AlreadyPresent));
        assert_eq!(cluster.create_calls().await, 0);
        assert_eq!(cluster.instrumentations_in("team-b").await, vec![existing]);
    }

    #[tokio::test]
    async fn test_scenario_d_failed_create_schedules_retry() {
        let cluster = MemoryCluster::with_namespaces(&["team-d"]).await;
        cluster.fail_next_creates(1).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());

        let first = reconciler
            .reconcile(&ReconcileRequest::new("team-d"), &RunContext::default())
            .await;
        assert_eq!(first, Outcome::RetryScheduled(Duration::from_secs(10)));
        assert!(cluster.instrumentations_in("team-d").await.is_empty());

        let second = reconciler
            .reconcile(
                &ReconcileRequest::new("team-d").with_failures(1),
                &RunContext::default(),
            )
            .await;
        assert_eq!(second, Outcome::Done);
        assert_eq!(cluster.instrumentations_in("team-d").await.len(), 1);
        assert_eq!(cluster.create_calls().await, 2);
    }

    #[tokio::test]
    async fn test_repeated_write_failures_back_off() {
        let cluster = MemoryCluster::with_namespaces(&["team-d"]).await;
        cluster.fail_next_creates(10).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());

        let mut delays = Vec::new();
        for failures in 0..4 {
            match reconciler
                .reconcile(
                    &ReconcileRequest::new("team-d").with_failures(failures),
                    &RunContext::default(),
                )
                .await
            {
                Outcome::RetryScheduled(delay) => delays.push(delay.as_secs()),
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert_eq!(delays, vec![10, 20, 40, 80]);
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let cluster = MemoryCluster::with_namespaces(&["team-a"]).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());
        let request = ReconcileRequest::new("team-a");

        assert_eq!(
            reconciler.reconcile(&request, &RunContext::default()).await,
            Outcome::Done
        );
        assert_eq!(
            reconciler.reconcile(&request, &RunContext::default()).await,
            Outcome::Skip(SkipReason::AlreadyPresent)
        );
        assert_eq!(cluster.instrumentations_in("team-a").await.len(), 1);
        assert_eq!(cluster.create_calls().await, 1);
    }

    #[tokio::test]
    async fn test_read_failure_is_failed_without_write() {
        let cluster = MemoryCluster::with_namespaces(&["team-a"]).await;
        cluster.fail_next_reads(1).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());

        let outcome = reconciler
            .reconcile(&ReconcileRequest::new("team-a"), &RunContext::default())
            .await;

        assert!(matches!(outcome, Outcome::Failed(ReconcileError::Read(_))));
        assert_eq!(cluster.create_calls().await, 0);
    }

    #[tokio::test]
    async fn test_deleted_namespace_is_skipped() {
        let cluster = MemoryCluster::new();
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());

        let outcome = reconciler
            .reconcile(&ReconcileRequest::new("gone"), &RunContext::default())
            .await;

        assert_eq!(outcome, Outcome::Skip(SkipReason::NamespaceGone));
        assert_eq!(
            cluster.calls().await,
            vec![ClusterCall::GetNamespace("gone".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let cluster = MemoryCluster::with_namespaces(&["team-a"]).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = reconciler
            .reconcile(
                &ReconcileRequest::new("team-a"),
                &RunContext::new(cancel, None),
            )
            .await;

        assert_eq!(outcome, Outcome::Failed(ReconcileError::Cancelled));
        assert!(cluster.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_stalled_write() {
        let cluster = MemoryCluster::with_namespaces(&["team-a"]).await;
        cluster.stall_creates(true).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());

        let outcome = reconciler
            .reconcile(
                &ReconcileRequest::new("team-a"),
                &RunContext::with_timeout(CancellationToken::new(), Duration::from_secs(5)),
            )
            .await;

        assert_eq!(outcome, Outcome::Failed(ReconcileError::DeadlineExceeded));
        assert!(cluster.instrumentations_in("team-a").await.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_during_write() {
        let cluster = MemoryCluster::with_namespaces(&["team-a"]).await;
        cluster.stall_creates(true).await;
        let reconciler = reconciler_for(&cluster, InjectorConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = reconciler
            .reconcile(&ReconcileRequest::new("team-a"), &RunContext::new(cancel, None))
            .await;

        assert_eq!(outcome, Outcome::Failed(ReconcileError::Cancelled));
        assert_eq!(cluster.create_calls().await, 1);
        assert!(cluster.instrumentations_in("team-a").await.is_empty());
    }
}

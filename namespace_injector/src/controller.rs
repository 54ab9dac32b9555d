//! Drives namespace reconciliation through the kube runtime [`applier`].
//!
//! The applier keeps one reconciliation per namespace in flight, coalesces
//! repeated triggers and owns the requeue timers. This module decides what
//! reaches it (only admitted events) and how each [`Outcome`] maps to an
//! [`Action`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use common::configuration::ControllerSettings;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::applier;
use kube::runtime::controller::{Action, Config};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::event_filter::{admit, EventKind, NamespaceEvent};
use crate::reconciler::{Outcome, ReconcileError, ReconcileRequest, Reconciler, RunContext};
use crate::retry::Backoff;
use crate::tracing::record_outcome;

/// Consecutive failures per namespace.
#[derive(Debug, Default)]
struct FailureCounts(Mutex<HashMap<String, u32>>);

impl FailureCounts {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, namespace: &str) -> u32 {
        self.lock().get(namespace).copied().unwrap_or(0)
    }

    /// Records a failure and returns the previous count.
    fn record(&self, namespace: &str) -> u32 {
        let mut counts = self.lock();
        let count = counts.entry(namespace.to_string()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    fn forget(&self, namespace: &str) {
        self.lock().remove(namespace);
    }
}

struct Context {
    reconciler: Arc<Reconciler>,
    failures: Arc<FailureCounts>,
    reconcile_timeout: Duration,
    redelivery: Backoff,
    shutdown: CancellationToken,
}

/// Feeds admitted namespace events to the reconciler and acts on its outcome.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    settings: ControllerSettings,
    redelivery: Backoff,
    failures: Arc<FailureCounts>,
}

impl Controller {
    pub fn new(reconciler: Reconciler, settings: ControllerSettings) -> Self {
        let redelivery = Backoff::redelivery(settings.retry_max_delay);
        Self {
            reconciler: Arc::new(reconciler),
            settings,
            redelivery,
            failures: Arc::default(),
        }
    }

    /// Consecutive failures currently recorded for `namespace`.
    pub fn failures(&self, namespace: &str) -> u32 {
        self.failures.get(namespace)
    }

    /// Runs until `shutdown` fires or the event stream ends. `store` must be
    /// populated from the same watch that produced `events`.
    pub async fn run<S>(&self, store: Store<Namespace>, events: S, shutdown: CancellationToken)
    where
        S: Stream<Item = NamespaceEvent> + Send,
    {
        // stopping on stream end must not cancel the caller's token
        let shutdown = shutdown.child_token();
        let context = Arc::new(Context {
            reconciler: Arc::clone(&self.reconciler),
            failures: Arc::clone(&self.failures),
            reconcile_timeout: self.settings.reconcile_timeout,
            redelivery: self.redelivery,
            shutdown: shutdown.clone(),
        });

        let failures = Arc::clone(&self.failures);
        let queue = events
            .filter_map(move |event| future::ready(dispatch(&failures, event)))
            .map(Ok::<_, Infallible>)
            .take_until(shutdown.clone().cancelled_owned());

        let concurrency = u16::try_from(self.settings.workers).unwrap_or(u16::MAX);
        let config = Config::default().concurrency(concurrency);
        info!(workers = concurrency, "controller started");

        let mut results = Box::pin(applier(
            reconcile,
            error_policy,
            context,
            store,
            queue,
            config,
        ));
        while let Some(result) = results.next().await {
            match result {
                Ok((object, action)) => {
                    debug!(namespace = %object.name, ?action, "reconciliation finished")
                }
                Err(err) => debug!(error = %err, "reconciliation did not complete"),
            }
        }
        info!("controller stopped");
    }
}

fn dispatch(failures: &FailureCounts, event: NamespaceEvent) -> Option<ObjectRef<Namespace>> {
    if admit(&event) {
        debug!(namespace = %event.name, "namespace created, queueing");
        return Some(ObjectRef::new(&event.name));
    }
    if event.kind == EventKind::Delete {
        failures.forget(&event.name);
    }
    debug!(namespace = %event.name, kind = ?event.kind, "discarding namespace event");
    None
}

fn reconcile(
    namespace: Arc<Namespace>,
    ctx: Arc<Context>,
) -> BoxFuture<'static, Result<Action, ReconcileError>> {
    async move {
        let name = namespace.name_any();
        let failures = ctx.failures.get(&name);
        let request = ReconcileRequest::new(name.as_str()).with_failures(failures);
        let run = RunContext::with_timeout(ctx.shutdown.child_token(), ctx.reconcile_timeout);

        let span = info_span!("reconcile", namespace = %name, attempt = failures + 1);
        let outcome = ctx
            .reconciler
            .reconcile(&request, &run)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &name, failures, &outcome);

        match outcome {
            Outcome::Done | Outcome::Skip(_) => {
                ctx.failures.forget(&name);
                Ok(Action::await_change())
            }
            Outcome::RetryScheduled(delay) => {
                ctx.failures.record(&name);
                Ok(Action::requeue(delay))
            }
            Outcome::Failed(err) => Err(err),
        }
    }
    .boxed()
}

fn error_policy(namespace: Arc<Namespace>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    if *err == ReconcileError::Cancelled && ctx.shutdown.is_cancelled() {
        return Action::await_change();
    }
    let name = namespace.name_any();
    let previous = ctx.failures.record(&name);
    let delay = ctx.redelivery.delay(previous);
    debug!(
        namespace = %name,
        delay_ms = delay.as_millis() as u64,
        "redelivering failed reconciliation"
    );
    Action::requeue(delay)
}

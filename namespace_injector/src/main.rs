use std::sync::Arc;

use common::configuration::Configuration;
use common::errors::StartupError;
use kube::Client;
use namespace_injector::cluster::kubernetes::{namespace_events, KubeCluster};
use namespace_injector::cluster::ClusterApi;
use namespace_injector::controller::Controller;
use namespace_injector::reconciler::Reconciler;
use namespace_injector::retry::Backoff;
use namespace_injector::utils::tracing::init_tracer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // configuration is loaded before tracing init so tracing settings can come from it
    let config = Configuration::from_env().map_err(StartupError::from)?;

    let tracer_provider = init_tracer(&config.tracing);
    info!(
        collector_endpoint = %config.injector.collector_endpoint,
        sampler = %config.injector.sampler_type,
        sampler_argument = %config.injector.sampler_argument,
        ignored_namespaces = ?config.injector.ignored_namespaces,
        workers = config.controller.workers,
        "loaded configuration"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| StartupError::ClusterConnection(e.to_string()))?;

    let cluster = KubeCluster::new(client.clone());
    cluster.preflight().await?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(cluster);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.cancel();
        });
    }

    let reconciler = Reconciler::new(
        Arc::new(config.injector),
        cluster,
        Backoff::write_retry(config.controller.retry_max_delay),
    );
    let controller = Controller::new(reconciler, config.controller);

    let (store, events) = namespace_events(client);
    controller.run(store, events, shutdown).await;

    if let Err(err) = tracer_provider.shutdown() {
        eprintln!("failed to flush spans on shutdown: {err}");
    }
    Ok(())
}

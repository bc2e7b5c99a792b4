//! Process wiring: clients, reconcilers, scheduler, watches and the health server.

use std::sync::Arc;
use std::time::Duration;

use metal::{ComputeProvider, TimeoutProvider};
use tokio::signal;
use tracing::{error, info};

use crate::config::ControllerConfig;
use crate::health::{self, Readiness};
use crate::reconcilers::{ClusterReconciler, MachineReconciler};
use crate::scheduler::{watches, Registry, ResourceKind, Scheduler, SchedulerConfig};
use crate::store::{KubeStore, ObjectStore};
use crate::telemetry::init_tracing;
use crate::types::{Context, Error, Result};

/// Run the controller until SIGTERM or Ctrl+C.
///
/// `provider` is the concrete compute provider client; every call through it
/// is bounded by `providerRequestTimeoutSecs`.
pub async fn run(config: ControllerConfig, provider: Arc<dyn ComputeProvider>) -> Result<()> {
    init_tracing(config.log_format);
    config
        .validate()
        .map_err(|e| Error::ConfigError(e.to_string()))?;

    info!(
        "Starting Metal infrastructure controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let provider: Arc<dyn ComputeProvider> = Arc::new(TimeoutProvider::new(
        provider,
        Duration::from_secs(config.provider_request_timeout_secs),
    ));
    let ctx = Arc::new(Context::new(Arc::clone(&store), provider));

    let registry = Registry::new()
        .register(
            ResourceKind::MetalCluster,
            Arc::new(ClusterReconciler::new(Arc::clone(&ctx))),
        )
        .register(
            ResourceKind::MetalMachine,
            Arc::new(MachineReconciler::new(Arc::clone(&ctx))),
        );
    let scheduler = Arc::new(Scheduler::new(registry, SchedulerConfig::from(&config)));

    let watch_handle = tokio::spawn(watches::run(
        client,
        config.namespace.clone(),
        store,
        scheduler.queue(),
    ));
    let workers_handle = tokio::spawn(Arc::clone(&scheduler).run());

    let readiness = Readiness::new();
    readiness.set_ready(true);

    let listener = tokio::net::TcpListener::bind(&config.health_addr).await?;
    info!("Health server listening on {}", config.health_addr);

    let served = axum::serve(listener, health::router(readiness.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    readiness.set_ready(false);
    if let Err(e) = &served {
        error!("Health server error: {}", e);
    }

    watch_handle.abort();
    scheduler.shutdown();
    if let Err(e) = workers_handle.await {
        error!("Reconcile workers terminated abnormally: {}", e);
    }
    info!("Metal infrastructure controller stopped");

    served.map_err(Error::from)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

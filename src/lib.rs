pub mod config;
pub mod controller;
pub mod crd;
pub mod resources;
pub mod retry;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::{LogFormat, ReconcilerConfig};
pub use controller::{
    Context, Error, KubeClient, KubeClientImpl, PolicyReconciler, ReconcileReport,
    ReconciliationMode, Result, TransportLayer,
};
pub use crd::PodSecurityPolicy;
pub use resources::PolicyName;
pub use retry::RetryPolicy;

/// Interval between checks for the kubeconfig file
pub const KUBECONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait until `path` is a regular file, checking every `interval`.
///
/// The server writes the admin kubeconfig some time after this process may
/// have started. A directory at `path` does not count.
pub async fn wait_for_kubeconfig(
    path: &Path,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut logged = false;
    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => return Ok(()),
            Ok(_) => {
                if !logged {
                    warn!("Kubeconfig path {} is not a regular file", path.display());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot read kubeconfig at {}: {}", path.display(), e),
        }
        if !logged {
            info!("Waiting for kubeconfig at {}", path.display());
            logged = true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Run the reconciler once against the cluster described by `config`.
///
/// Waits for the kubeconfig, builds a client with the configured request
/// timeout, then polls until one pass has completed.
pub async fn run_reconciler(
    config: &ReconcilerConfig,
    cancel: &CancellationToken,
) -> Result<ReconcileReport> {
    run_reconciler_with(config, None, cancel).await
}

/// Like [`run_reconciler`], with `transport` wrapped around every API call.
pub async fn run_reconciler_with(
    config: &ReconcilerConfig,
    transport: Option<&TransportLayer>,
    cancel: &CancellationToken,
) -> Result<ReconcileReport> {
    wait_for_kubeconfig(&config.kubeconfig, KUBECONFIG_POLL_INTERVAL, cancel).await?;

    let client = controller::connect(&config.kubeconfig, config.api_timeout, transport).await?;
    info!("Kubernetes client created from {}", config.kubeconfig.display());

    let ctx = Context::new(Arc::new(KubeClientImpl::new(client)), config);
    PolicyReconciler::new(ctx).run(cancel).await
}

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use psp_reconciler::{LogFormat, ReconcilerConfig, run_reconciler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        // A provider is already installed, which is fine
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            return Err(
                "Failed to install rustls crypto provider and no provider is available".into(),
            );
        }
    }

    let config = ReconcilerConfig::from_env()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("psp_reconciler=info,kube=warn"))?;
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!(
        mode = %config.mode(),
        kubeconfig = %config.kubeconfig.display(),
        "Starting psp-reconciler"
    );

    let cancel = CancellationToken::new();

    // Handle graceful shutdown on SIGTERM or SIGINT
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Received shutdown signal, cancelling");
            cancel.cancel();
        });
    }

    if let Some(deadline) = config.deadline {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!("Deadline of {:?} reached, cancelling", deadline);
            cancel.cancel();
        });
    }

    match run_reconciler(&config, &cancel).await {
        Ok(report) => {
            info!(
                resolved = ?report.resolved,
                skipped = ?report.skipped,
                "Reconciler finished"
            );
            Ok(())
        }
        Err(e) => {
            error!("Reconciler failed: {}", e);
            Err(e.into())
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

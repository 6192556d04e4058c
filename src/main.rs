//! mesh-verifier - end-to-end verification of a service mesh deployment.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads configuration from the environment
//! - Creates the Kubernetes client
//! - Runs the mesh scenario until it passes, fails, or a signal arrives
//! - Prints the step report and metrics

use std::process::ExitCode;
use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mesh_verifier::{Metrics, VerifierConfig, run_verification};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mesh_verifier=info".parse()?)
                .add_directive("kube=warn".parse()?),
        )
        .json()
        .init();

    info!("Starting mesh-verifier");

    let config = VerifierConfig::from_env()?;

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let cancel = CancellationToken::new();
    let signal_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Received shutdown signal, cancelling verification");
            cancel.cancel();
        })
    };

    let metrics = Arc::new(Metrics::new());
    let result = run_verification(client, &config, metrics.clone(), &cancel).await;
    signal_handle.abort();

    let code = match result {
        Ok(report) => {
            println!("{report}");
            info!(steps = report.steps.len(), "Mesh verification passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, timeout = e.is_timeout(), "Mesh verification failed");
            ExitCode::FAILURE
        }
    };

    match metrics.encode() {
        Ok(text) => println!("{text}"),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }

    Ok(code)
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! mesh-verifier library crate
//!
//! Verification engine for service mesh end-to-end checks: a condition
//! poller, resource observers (pod readiness, operator install, operator
//! status, HTTP reachability) and a retrying remote command executor, tied
//! together by the mesh scenario driver.

pub mod cluster;
pub mod config;
pub mod document;
pub mod error;
pub mod exec;
pub mod metrics;
pub mod observers;
pub mod poll;
pub mod scenario;

pub use cluster::{ClusterClient, KubeClusterClient};
pub use config::VerifierConfig;
pub use error::{Error, Result};
pub use exec::{ExecRequest, ExecResult, RemoteExecutor};
pub use metrics::Metrics;
pub use poll::{Condition, PollSpec, poll_until};
pub use scenario::{MeshScenario, ScenarioReport};

use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

use observers::HttpProbe;

/// Run the mesh scenario described by `config` against a live cluster.
///
/// Gate outcomes and exec attempts are recorded in `metrics`.
pub async fn run_verification(
    client: Client,
    config: &VerifierConfig,
    metrics: Arc<Metrics>,
    cancel: &CancellationToken,
) -> Result<ScenarioReport> {
    let scenario = config.scenario()?.with_metrics(metrics.clone());
    let cluster = KubeClusterClient::new(client);
    let executor = RemoteExecutor::new(&cluster).with_metrics(metrics);
    let probe = HttpProbe::with_timeout(config.probe_timeout)?;

    info!(
        namespace = %scenario.workload_namespace,
        control_plane = %scenario.control_plane_namespace,
        "Running mesh scenario"
    );
    Ok(scenario.run(&cluster, &executor, &probe, cancel).await?)
}

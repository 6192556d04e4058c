//! Service mesh verification scenario.
//!
//! Runs the end-to-end check of an istio-csr backed mesh against resources
//! that are already applied:
//!
//! 1. operator install and operator status gates (optional)
//! 2. control-plane readiness gates (ingress gateway, egress gateway, istiod)
//! 3. workload readiness gates (client and server)
//! 4. in-mesh traffic: `curl` from the client pod to the server service
//! 5. ingress traffic: `HEAD` through the ingress gateway route
//!
//! Steps run strictly in order; the first failure ends the run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::cluster::{ClusterClient, ExecTarget, ResourceRef};
use crate::exec::{ExecError, ExecRequest, RemoteExecutor};
use crate::metrics::Metrics;
use crate::observers::{
    ConditionExpectations, HttpProbe, LookupError, OperatorConditions, OperatorInstall,
    PodReadiness, first_pod_name, ingress_url, route_host,
};
use crate::poll::{Condition, ConditionError, FnCondition, PollError, PollSpec, poll_until};

/// Control-plane namespace of a default mesh install.
pub const DEFAULT_CONTROL_PLANE_NAMESPACE: &str = "istio-system";
/// Pods that must be ready before workloads are checked.
pub const DEFAULT_CONTROL_PLANE_SELECTORS: [&str; 3] = [
    "app=istio-ingressgateway",
    "app=istio-egressgateway",
    "app=istiod",
];
pub const DEFAULT_CLIENT_SELECTOR: &str = "app=sleep";
pub const DEFAULT_CLIENT_CONTAINER: &str = "sleep";
pub const DEFAULT_SERVER_SELECTOR: &str = "app=httpbin";
pub const DEFAULT_SERVER_SERVICE: &str = "httpbin";
pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const DEFAULT_SERVER_PATH: &str = "/ip";
pub const DEFAULT_INGRESS_ROUTE: &str = "istio-ingressgateway";
pub const DEFAULT_INGRESS_PATH: &str = "/headers";
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Errors that end a scenario run.
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Step {step}: {source}")]
    Gate {
        step: String,
        #[source]
        source: PollError,
    },

    #[error("Step {step}: {source}")]
    Lookup {
        step: String,
        #[source]
        source: LookupError,
    },

    #[error("Step {step}: {source}")]
    Exec {
        step: String,
        #[source]
        source: ExecError,
    },

    #[error("Step {step}: expected status {expected}, got {actual}{}", stderr_suffix(.stderr))]
    UnexpectedStatus {
        step: String,
        expected: u16,
        actual: u16,
        /// Stderr of the probe command, if it printed any.
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!("; stderr: {}", stderr.trim())
    }
}

impl ScenarioError {
    pub fn step(&self) -> &str {
        match self {
            ScenarioError::Gate { step, .. }
            | ScenarioError::Lookup { step, .. }
            | ScenarioError::Exec { step, .. }
            | ScenarioError::UnexpectedStatus { step, .. } => step,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ScenarioError::Gate { source, .. } => source.is_cancelled(),
            ScenarioError::Exec { source, .. } => matches!(source, ExecError::Cancelled { .. }),
            _ => false,
        }
    }
}

/// What kind of work a step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Polled a condition; iterations are ticks.
    Gate,
    /// Ran a remote command; iterations are attempts.
    Exec,
    /// Probed an endpoint through the poller; iterations are ticks.
    Probe,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Gate => write!(f, "gate"),
            StepKind::Exec => write!(f, "exec"),
            StepKind::Probe => write!(f, "probe"),
        }
    }
}

/// Outcome of one passed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub kind: StepKind,
    pub iterations: u32,
    pub duration: Duration,
}

/// Steps passed by a successful run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
}

impl ScenarioReport {
    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.duration).sum()
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(
                f,
                "{:<48} {:<6} {:>4} {:>10.1?}",
                step.name, step.kind, step.iterations, step.duration
            )?;
        }
        write!(f, "total {:?}", self.total_duration())
    }
}

/// OLM subscription whose operator must be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRef {
    pub namespace: String,
    pub name: String,
}

/// Operator resource whose status conditions must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorStatusGate {
    pub resource: ResourceRef,
    pub expectations: ConditionExpectations,
}

/// Retry budget for the in-mesh traffic command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSettings {
    pub max_attempts: u32,
    pub attempt_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            max_attempts: crate::exec::DEFAULT_MAX_ATTEMPTS,
            attempt_backoff: crate::exec::DEFAULT_ATTEMPT_BACKOFF,
            attempt_timeout: crate::exec::DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// A fully resolved verification run.
#[derive(Debug, Clone)]
pub struct MeshScenario {
    pub poll: PollSpec,
    pub operator_install: Option<SubscriptionRef>,
    pub operator_status: Option<OperatorStatusGate>,
    pub control_plane_namespace: String,
    pub control_plane_selectors: Vec<String>,
    pub workload_namespace: String,
    pub client_selector: String,
    pub client_container: String,
    pub server_selector: String,
    pub server_service: String,
    pub server_port: u16,
    pub server_path: String,
    pub ingress_route: String,
    pub ingress_path: String,
    pub expected_status: u16,
    pub exec: ExecSettings,
    metrics: Option<Arc<Metrics>>,
}

impl MeshScenario {
    /// Scenario with default selectors checking workloads in `workload_namespace`.
    pub fn new(workload_namespace: impl Into<String>, poll: PollSpec) -> Self {
        Self {
            poll,
            operator_install: None,
            operator_status: None,
            control_plane_namespace: DEFAULT_CONTROL_PLANE_NAMESPACE.to_string(),
            control_plane_selectors: DEFAULT_CONTROL_PLANE_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            workload_namespace: workload_namespace.into(),
            client_selector: DEFAULT_CLIENT_SELECTOR.to_string(),
            client_container: DEFAULT_CLIENT_CONTAINER.to_string(),
            server_selector: DEFAULT_SERVER_SELECTOR.to_string(),
            server_service: DEFAULT_SERVER_SERVICE.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            server_path: DEFAULT_SERVER_PATH.to_string(),
            ingress_route: DEFAULT_INGRESS_ROUTE.to_string(),
            ingress_path: DEFAULT_INGRESS_PATH.to_string(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            exec: ExecSettings::default(),
            metrics: None,
        }
    }

    pub fn with_operator_install(mut self, namespace: impl Into<String>, subscription: impl Into<String>) -> Self {
        self.operator_install = Some(SubscriptionRef {
            namespace: namespace.into(),
            name: subscription.into(),
        });
        self
    }

    pub fn with_operator_status(mut self, resource: ResourceRef, expectations: ConditionExpectations) -> Self {
        self.operator_status = Some(OperatorStatusGate {
            resource,
            expectations,
        });
        self
    }

    pub fn with_exec_settings(mut self, exec: ExecSettings) -> Self {
        self.exec = exec;
        self
    }

    /// Record gate outcomes in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// In-mesh URL of the server service.
    pub fn server_url(&self) -> String {
        format!(
            "http://{}.{}:{}/{}",
            self.server_service,
            self.workload_namespace,
            self.server_port,
            self.server_path.trim_start_matches('/')
        )
    }

    /// Command printing the response preamble of a request to the server.
    pub fn traffic_command(&self) -> Vec<String> {
        ["curl", "-s", "-o", "/dev/null", "-D", "-"]
            .into_iter()
            .map(String::from)
            .chain(std::iter::once(self.server_url()))
            .collect()
    }

    /// Run every step in order.
    #[instrument(skip_all, fields(namespace = %self.workload_namespace))]
    pub async fn run<C: ClusterClient>(
        &self,
        client: &C,
        executor: &RemoteExecutor<'_, C>,
        probe: &HttpProbe,
        cancel: &CancellationToken,
    ) -> Result<ScenarioReport, ScenarioError> {
        let mut report = ScenarioReport::default();
        info!("Starting mesh verification");

        if let Some(sub) = &self.operator_install {
            let condition = OperatorInstall::new(client, &sub.namespace, &sub.name);
            let name = format!("operator-install {}/{}", sub.namespace, sub.name);
            report.steps.push(self.gate(&name, StepKind::Gate, &condition, cancel).await?);
        }

        if let Some(gate) = &self.operator_status {
            let condition =
                OperatorConditions::new(client, gate.resource.clone(), gate.expectations.clone());
            let name = format!("operator-status {}", gate.resource.name);
            report.steps.push(self.gate(&name, StepKind::Gate, &condition, cancel).await?);
        }

        for selector in &self.control_plane_selectors {
            let condition = PodReadiness::new(client, &self.control_plane_namespace, selector);
            let name = format!("ready {}/{}", self.control_plane_namespace, selector);
            report.steps.push(self.gate(&name, StepKind::Gate, &condition, cancel).await?);
        }

        for selector in [&self.client_selector, &self.server_selector] {
            let condition = PodReadiness::new(client, &self.workload_namespace, selector);
            let name = format!("ready {}/{}", self.workload_namespace, selector);
            report.steps.push(self.gate(&name, StepKind::Gate, &condition, cancel).await?);
        }

        report.steps.push(self.mesh_traffic(client, executor, cancel).await?);
        report.steps.push(self.ingress_traffic(client, probe, cancel).await?);

        info!(steps = report.steps.len(), total = ?report.total_duration(), "Mesh verification passed");
        Ok(report)
    }

    async fn gate<K: Condition>(
        &self,
        name: &str,
        kind: StepKind,
        condition: &K,
        cancel: &CancellationToken,
    ) -> Result<StepReport, ScenarioError> {
        info!(step = name, condition = %condition.describe(), "Waiting for gate");
        let start = Instant::now();
        match poll_until(&self.poll, condition, cancel).await {
            Ok(outcome) => {
                self.record_gate(name, "satisfied", outcome.ticks, outcome.elapsed);
                info!(step = name, ticks = outcome.ticks, elapsed = ?outcome.elapsed, "Gate passed");
                Ok(StepReport {
                    name: name.to_string(),
                    kind,
                    iterations: outcome.ticks,
                    duration: outcome.elapsed,
                })
            }
            Err(e) => {
                let outcome = match &e {
                    PollError::Timeout { .. } => "timeout",
                    PollError::Cancelled { .. } => "cancelled",
                    PollError::Condition { .. } => "failed",
                    PollError::InvalidSpec(_) => "invalid",
                };
                self.record_gate(name, outcome, e.ticks(), start.elapsed());
                error!(step = name, error = %e, "Gate failed");
                Err(ScenarioError::Gate {
                    step: name.to_string(),
                    source: e,
                })
            }
        }
    }

    async fn mesh_traffic<C: ClusterClient>(
        &self,
        client: &C,
        executor: &RemoteExecutor<'_, C>,
        cancel: &CancellationToken,
    ) -> Result<StepReport, ScenarioError> {
        let step = format!("mesh-traffic {}", self.server_url());
        let start = Instant::now();

        let pod = first_pod_name(client, &self.workload_namespace, &self.client_selector)
            .await
            .map_err(|source| ScenarioError::Lookup {
                step: step.clone(),
                source,
            })?;

        let request = ExecRequest::new(
            ExecTarget::new(pod, &self.workload_namespace, &self.client_container),
            self.traffic_command(),
        )
        .with_max_attempts(self.exec.max_attempts)
        .with_attempt_backoff(self.exec.attempt_backoff)
        .with_attempt_timeout(self.exec.attempt_timeout)
        .decode_http();

        info!(step = %step, target = %request.target, "Sending in-mesh request");
        let result = executor.exec(&request, cancel).await.map_err(|source| {
            error!(step = %step, error = %source, "In-mesh request failed");
            ScenarioError::Exec {
                step: step.clone(),
                source,
            }
        })?;

        let actual = result.status_code.unwrap_or_default();
        if actual != self.expected_status {
            error!(step = %step, expected = self.expected_status, actual, "Unexpected in-mesh status");
            return Err(ScenarioError::UnexpectedStatus {
                step,
                expected: self.expected_status,
                actual,
                stderr: result.stderr_str().into_owned(),
            });
        }

        info!(step = %step, attempts = result.attempts, "In-mesh request passed");
        Ok(StepReport {
            name: step,
            kind: StepKind::Exec,
            iterations: result.attempts,
            duration: start.elapsed(),
        })
    }

    async fn ingress_traffic<C: ClusterClient>(
        &self,
        client: &C,
        probe: &HttpProbe,
        cancel: &CancellationToken,
    ) -> Result<StepReport, ScenarioError> {
        let lookup_step = format!("ingress-route {}/{}", self.control_plane_namespace, self.ingress_route);
        let host = route_host(client, &self.control_plane_namespace, &self.ingress_route)
            .await
            .map_err(|source| ScenarioError::Lookup {
                step: lookup_step,
                source,
            })?;

        let url = ingress_url(&host, &self.ingress_path);
        let expected = self.expected_status;
        let condition = FnCondition::new(format!("HEAD {} returns {}", url, expected), || {
            let url = url.as_str();
            async move {
                let status = probe.head(url).await.map_err(ConditionError::transient)?;
                if status == expected {
                    Ok(true)
                } else {
                    Err(ConditionError::Transient(format!(
                        "status {}, expected {}",
                        status, expected
                    )))
                }
            }
        });

        let step = format!("ingress-traffic {}", url);
        self.gate(&step, StepKind::Probe, &condition, cancel).await
    }

    fn record_gate(&self, name: &str, outcome: &str, ticks: u32, duration: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_gate(name, outcome, ticks, duration);
        }
    }
}

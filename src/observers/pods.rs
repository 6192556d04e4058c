//! Pod readiness observer.

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::poll::{Condition, ConditionError};

/// Phase a pod must report to be considered ready.
pub const RUNNING_PHASE: &str = "Running";

/// Check if a pod is ready.
///
/// A pod is ready when its phase is `Running` and every reported container
/// status is `ready` with a non-null running state.
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some(RUNNING_PHASE) {
        return false;
    }
    status
        .container_statuses
        .as_deref()
        .unwrap_or_default()
        .iter()
        .all(|cs| cs.ready && cs.state.as_ref().is_some_and(|s| s.running.is_some()))
}

/// Waits until every pod matching a label selector is ready.
///
/// An empty match is "not yet": the workload may simply not be scheduled.
pub struct PodReadiness<'a, C> {
    client: &'a C,
    namespace: String,
    label_selector: String,
}

impl<'a, C: ClusterClient> PodReadiness<'a, C> {
    pub fn new(client: &'a C, namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            label_selector: label_selector.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn label_selector(&self) -> &str {
        &self.label_selector
    }
}

impl<C: ClusterClient> Condition for PodReadiness<'_, C> {
    async fn evaluate(&self) -> Result<bool, ConditionError> {
        let pods = self
            .client
            .list_pods(&self.namespace, &self.label_selector)
            .await
            .map_err(ConditionError::transient)?;

        if pods.is_empty() {
            debug!(namespace = %self.namespace, selector = %self.label_selector, "No pods match selector yet");
            return Ok(false);
        }

        let ready = pods.iter().filter(|p| is_pod_ready(p)).count();
        debug!(
            namespace = %self.namespace,
            selector = %self.label_selector,
            ready,
            total = pods.len(),
            "Pod readiness"
        );
        Ok(ready == pods.len())
    }

    fn describe(&self) -> String {
        format!("pods {} in {} ready", self.label_selector, self.namespace)
    }
}

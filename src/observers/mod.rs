//! Resource observers.
//!
//! Each observer is a [`Condition`](crate::poll::Condition) bound to a
//! resource kind and selector, re-evaluated from fresh cluster reads on
//! every tick.
//!
//! ## Architecture
//!
//! - `pods`: every pod matching a selector is running and ready
//! - `operator`: OLM subscription -> installed CSV -> `Succeeded`
//! - `conditions`: operator resource status conditions
//! - `http`: single-shot `HEAD` probe of an external endpoint
//!
//! The single-shot lookups at the bottom of this module resolve inputs for
//! the scenario driver (exec targets, ingress hosts); they are not polled.

pub mod conditions;
pub mod http;
pub mod operator;
pub mod pods;

pub use conditions::{ConditionExpectations, ExpectedCondition, OperatorConditions};
pub use http::{HttpProbe, ProbeError, ingress_url};
pub use operator::{InstallState, OperatorInstall};
pub use pods::{PodReadiness, is_pod_ready};

use thiserror::Error;

use crate::cluster::{ClusterClient, ClusterError, ResourceRef};
use crate::document::Lookup;

/// Errors from single-shot lookups.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("No pods found for selector {selector} in {namespace}")]
    NoPodsFound { namespace: String, selector: String },

    #[error("Resource {0} not found")]
    NotFound(String),

    #[error("Resource {resource}: {reason}")]
    MissingField { resource: String, reason: String },
}

/// Name of the first pod matching `label_selector`.
pub async fn first_pod_name<C: ClusterClient>(
    client: &C,
    namespace: &str,
    label_selector: &str,
) -> Result<String, LookupError> {
    client
        .list_pods(namespace, label_selector)
        .await?
        .into_iter()
        .find_map(|p| p.metadata.name)
        .ok_or_else(|| LookupError::NoPodsFound {
            namespace: namespace.to_string(),
            selector: label_selector.to_string(),
        })
}

/// Host served by an OpenShift Route (`spec.host`).
pub async fn route_host<C: ClusterClient>(
    client: &C,
    namespace: &str,
    route: &str,
) -> Result<String, LookupError> {
    let resource = ResourceRef::route(namespace, route);
    let doc = client
        .get_document(&resource)
        .await?
        .ok_or_else(|| LookupError::NotFound(resource.to_string()))?;

    match doc.str_at(&["spec", "host"]) {
        Lookup::Found(host) if !host.is_empty() => Ok(host.to_string()),
        Lookup::Found(_) => Err(LookupError::MissingField {
            resource: resource.to_string(),
            reason: "spec.host is empty".to_string(),
        }),
        other => Err(LookupError::MissingField {
            resource: resource.to_string(),
            reason: other.to_string(),
        }),
    }
}

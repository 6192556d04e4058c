//! Cluster client abstraction.
//!
//! The verification engine only talks to the cluster through the
//! [`ClusterClient`] trait so that observers and the remote executor can be
//! exercised against scripted fakes. [`KubeClusterClient`] is the kube-rs
//! implementation used against a live API server.
//!
//! ## Architecture
//!
//! - `types`: resource references, exec targets and the exec stream handle
//! - `kube_client`: kube-rs backed implementation

pub mod kube_client;
pub mod types;

use std::future::Future;

use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;

use crate::document::Document;

pub use kube_client::KubeClusterClient;
pub use types::{BoxedReader, ExecStream, ExecTarget, ResourceRef, StreamError};

/// Errors returned by cluster reads.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cluster unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}

/// Operations the verification engine needs from a cluster.
pub trait ClusterClient: Send + Sync {
    /// List pods in `namespace` matching a label selector.
    fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> impl Future<Output = Result<Vec<Pod>, ClusterError>> + Send;

    /// Fetch a single resource as a generic document.
    ///
    /// Returns `Ok(None)` when the resource does not exist.
    fn get_document(
        &self,
        resource: &ResourceRef,
    ) -> impl Future<Output = Result<Option<Document>, ClusterError>> + Send;

    /// Open a streaming exec channel running `command` in the target container.
    fn open_exec(
        &self,
        target: &ExecTarget,
        command: &[String],
    ) -> impl Future<Output = Result<ExecStream, StreamError>> + Send;
}
